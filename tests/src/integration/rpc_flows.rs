//! # RPC Integration Flows
//!
//! Call forwarding, reply correlation, the fault taxonomy, and the
//! platform timeout, exercised end-to-end over the in-process transport.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use gridbus_transport::TestAgent;
    use gridbus_types::{Envelope, FaultKind, Identity, Subsystem};
    use std::time::Duration;

    /// Receive frames until something other than a pong arrives.
    async fn next_non_pong(agent: &mut TestAgent, total: Duration) -> Option<Envelope> {
        let deadline = tokio::time::Instant::now() + total;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match agent.recv_within(remaining).await? {
                envelope if envelope.subsystem == Subsystem::Pong => continue,
                envelope => return Some(envelope),
            }
        }
    }

    #[tokio::test]
    async fn test_call_and_reply_round_trip() {
        let (handle, _router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let call_id = controller
            .call(driver.identity(), "set_point", &[b"[\"room1\", 21.5]"])
            .await
            .unwrap();

        let call = driver.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(call.subsystem, Subsystem::RpcCall);
        assert_eq!(call.sender.as_str(), "ctl1");
        assert_eq!(call.id, call_id);
        assert_eq!(call.arg_str(0), Some("set_point"));

        driver
            .reply(&call.sender, &call.id, b"\"ok\"")
            .await
            .unwrap();

        let reply = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(reply.subsystem, Subsystem::RpcReply);
        assert_eq!(reply.id, call_id);
        assert_eq!(reply.sender.as_str(), "drv1");
        assert_eq!(reply.args[0], b"\"ok\"".to_vec());
    }

    #[tokio::test]
    async fn test_application_fault_is_forwarded_to_caller() {
        let (handle, _router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let call_id = controller
            .call(driver.identity(), "set_point", &[b"[\"bad\"]"])
            .await
            .unwrap();
        let call = driver.recv_within(DELIVERY_WAIT).await.unwrap();

        driver
            .fault(&call.sender, &call.id, FaultKind::Application, "no such point")
            .await
            .unwrap();

        let fault = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(fault.subsystem, Subsystem::RpcFault);
        assert_eq!(fault.id, call_id);
        assert_eq!(fault.arg_str(0), Some("application"));
        assert_eq!(fault.arg_str(1), Some("no such point"));
    }

    #[tokio::test]
    async fn test_call_to_unknown_identity_faults_unreachable() {
        let (handle, _router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();

        let ghost = Identity::new("ghost").unwrap();
        let call_id = controller.call(&ghost, "query", &[]).await.unwrap();

        let fault = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(fault.subsystem, Subsystem::RpcFault);
        assert_eq!(fault.id, call_id);
        assert_eq!(fault.arg_str(0), Some("unreachable"));
    }

    #[tokio::test]
    async fn test_call_without_capability_faults_denied() {
        let (handle, _router) = start_router();
        let mut no_caps = TestAgent::connect(&handle, CRED_NO_CAPS, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let call_id = no_caps
            .call(driver.identity(), "set_point", &[])
            .await
            .unwrap();

        let fault = no_caps.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(fault.subsystem, Subsystem::RpcFault);
        assert_eq!(fault.id, call_id);
        assert_eq!(fault.arg_str(0), Some("capability-denied"));
        // The callee never sees the call.
        driver.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_faults_caller_and_late_reply_is_dropped() {
        let (handle, _router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let call_id = controller
            .call(driver.identity(), "query", &[b"\"all\""])
            .await
            .unwrap();
        let call = driver.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(call.subsystem, Subsystem::RpcCall);

        // The driver never answers. Keep both connections live with pings
        // so only the call deadline fires, then wait out the platform
        // timeout plus a sweep.
        let cfg = timings();
        let fault = loop {
            controller.ping().await.unwrap();
            driver.ping().await.unwrap();
            match next_non_pong(
                &mut controller,
                Duration::from_millis(cfg.heartbeat_interval_ms / 2),
            )
            .await
            {
                Some(envelope) => break envelope,
                None => continue,
            }
        };
        assert_eq!(fault.subsystem, Subsystem::RpcFault);
        assert_eq!(fault.id, call_id);
        assert_eq!(fault.arg_str(0), Some("timeout"));

        // The reply arriving after the fault resolves nothing.
        driver.reply(&call.sender, &call.id, b"late").await.unwrap();
        assert!(next_non_pong(&mut controller, SILENCE_WAIT).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_reply_is_delivered_exactly_once() {
        let (handle, _router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let call_id = controller
            .call(driver.identity(), "query", &[])
            .await
            .unwrap();
        let call = driver.recv_within(DELIVERY_WAIT).await.unwrap();

        driver.reply(&call.sender, &call.id, b"first").await.unwrap();
        driver.reply(&call.sender, &call.id, b"second").await.unwrap();

        let reply = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(reply.id, call_id);
        assert_eq!(reply.args[0], b"first".to_vec());
        controller.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_same_call_id_from_two_callers_correlates_per_caller() {
        let (handle, _router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        // Ids are chosen by the caller, so two agents may pick the same one.
        for agent in [&controller, &historian] {
            let call = Envelope::to_peer(
                agent.identity().clone(),
                driver.identity().clone(),
                Subsystem::RpcCall,
            )
            .with_id("req-1")
            .with_args(vec![b"query".to_vec()]);
            agent.send(&call).await.unwrap();
        }

        let first = driver.recv_within(DELIVERY_WAIT).await.unwrap();
        let second = driver.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(first.id, "req-1");
        assert_eq!(second.id, "req-1");
        assert_ne!(first.sender, second.sender);

        for call in [&first, &second] {
            let payload = format!("\"for {}\"", call.sender);
            driver
                .reply(&call.sender, &call.id, payload.as_bytes())
                .await
                .unwrap();
        }

        let to_controller = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(to_controller.subsystem, Subsystem::RpcReply);
        assert_eq!(to_controller.id, "req-1");
        assert_eq!(to_controller.args[0], b"\"for ctl1\"".to_vec());

        let to_historian = historian.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(to_historian.subsystem, Subsystem::RpcReply);
        assert_eq!(to_historian.id, "req-1");
        assert_eq!(to_historian.args[0], b"\"for hist1\"".to_vec());
    }

    #[tokio::test]
    async fn test_concurrent_calls_correlate_independently() {
        let (handle, _router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let first = controller
            .call(driver.identity(), "query", &[b"\"a\""])
            .await
            .unwrap();
        let second = controller
            .call(driver.identity(), "query", &[b"\"b\""])
            .await
            .unwrap();
        assert_ne!(first, second);

        let call_a = driver.recv_within(DELIVERY_WAIT).await.unwrap();
        let call_b = driver.recv_within(DELIVERY_WAIT).await.unwrap();

        // Answer out of order; each reply lands on its own call id.
        driver.reply(&call_b.sender, &call_b.id, b"rb").await.unwrap();
        driver.reply(&call_a.sender, &call_a.id, b"ra").await.unwrap();

        let reply_b = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(reply_b.id, second);
        assert_eq!(reply_b.args[0], b"rb".to_vec());
        let reply_a = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(reply_a.id, first);
        assert_eq!(reply_a.args[0], b"ra".to_vec());
    }
}
