//! # Lifecycle Integration Flows
//!
//! Handshake outcomes, sender authority, disconnect cascades, liveness
//! eviction, graceful shutdown, and a TCP end-to-end pass.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use gridbus_transport::testing::AgentError;
    use gridbus_transport::{TcpClient, TcpTransport, TestAgent};
    use gridbus_types::{Envelope, Identity, Subsystem};
    use std::time::Duration;

    // =========================================================
    // Handshake
    // =========================================================

    #[tokio::test]
    async fn test_proposed_identity_overrides_stored_default() {
        let (handle, _router) = start_router();
        let agent = TestAgent::connect(&handle, CRED_DRIVER, Some("drv1.backup"))
            .await
            .unwrap();
        assert_eq!(agent.identity().as_str(), "drv1.backup");
    }

    #[tokio::test]
    async fn test_live_identity_cannot_be_claimed_again() {
        let (handle, _router) = start_router();
        let _first = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        // Same credential again.
        match TestAgent::connect(&handle, CRED_DRIVER, None).await {
            Err(AgentError::Refused { code, .. }) => assert_eq!(code, "identity-conflict"),
            other => panic!("expected refusal, got {other:?}"),
        }

        // Different credential proposing the live name.
        match TestAgent::connect(&handle, CRED_NO_CAPS, Some("drv1")).await {
            Err(AgentError::Refused { code, .. }) => assert_eq!(code, "identity-conflict"),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reserved_platform_prefix_is_refused() {
        let (handle, _router) = start_router();
        match TestAgent::connect(&handle, CRED_DRIVER, Some("gridbus.imposter")).await {
            Err(AgentError::Refused { code, .. }) => assert_eq!(code, "identity-conflict"),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_identity_is_reusable_after_clean_disconnect() {
        let (handle, _router) = start_router();
        let first = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        first.disconnect().await.unwrap();

        let second = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        assert_eq!(second.identity().as_str(), "drv1");
    }

    // =========================================================
    // Sender authority
    // =========================================================

    #[tokio::test]
    async fn test_spoofed_sender_is_rejected_not_rewritten() {
        let (handle, _router) = start_router();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut console = TestAgent::connect(&handle, CRED_CONSOLE, None).await.unwrap();
        console.subscribe("devices/#").await.unwrap();

        // drv1's connection claims ui1 as the sender.
        let forged = Envelope::to_router(Identity::new("ui1").unwrap(), Subsystem::Publish)
            .with_args(vec![b"devices/b1/temp".to_vec(), b"forged".to_vec()]);
        driver.send(&forged).await.unwrap();

        let error = driver.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(error.subsystem, Subsystem::Error);
        assert_eq!(error.arg_str(0), Some("malformed"));
        console.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    // =========================================================
    // Disconnect cascades and liveness
    // =========================================================

    #[tokio::test]
    async fn test_callee_disconnect_faults_pending_callers() {
        let (handle, _router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let call_id = controller
            .call(driver.identity(), "set_point", &[])
            .await
            .unwrap();
        assert!(driver.recv_within(DELIVERY_WAIT).await.is_some());

        driver.disconnect().await.unwrap();

        let fault = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(fault.subsystem, Subsystem::RpcFault);
        assert_eq!(fault.id, call_id);
        assert_eq!(fault.arg_str(0), Some("peer-gone"));
    }

    #[tokio::test]
    async fn test_subscriptions_do_not_survive_reconnect() {
        let (handle, _router) = start_router();
        let controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        driver.subscribe("control/#").await.unwrap();
        driver.disconnect().await.unwrap();

        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        controller.publish("control/hvac/mode", b"eco").await.unwrap();
        driver.expect_silence(SILENCE_WAIT).await.unwrap();

        driver.subscribe("control/#").await.unwrap();
        controller.publish("control/hvac/mode", b"eco").await.unwrap();
        let delivery = driver.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(delivery.arg_str(0), Some("control/hvac/mode"));
    }

    #[tokio::test]
    async fn test_silent_peer_is_evicted_and_identity_freed() {
        let (handle, _router) = start_router();
        let first = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        // Vanish without a disconnect, like a crashed process.
        drop(first);

        let cfg = timings();
        tokio::time::sleep(Duration::from_millis(
            cfg.liveness_deadline_ms() + 4 * cfg.sweep_interval_ms,
        ))
        .await;

        let second = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        assert_eq!(second.identity().as_str(), "drv1");
    }

    #[tokio::test]
    async fn test_ping_keeps_a_quiet_connection_alive() {
        let (handle, _router) = start_router();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let cfg = timings();
        // Stay quiet except for pings across several liveness deadlines.
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(cfg.heartbeat_interval_ms / 2)).await;
            driver.ping().await.unwrap();
            let pong = driver.recv_within(DELIVERY_WAIT).await.unwrap();
            assert_eq!(pong.subsystem, Subsystem::Pong);
        }

        // Still admitted: an operation goes through without a handshake.
        driver.publish("devices/b1/temp", b"alive").await.unwrap();
        driver.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    // =========================================================
    // Shutdown
    // =========================================================

    #[tokio::test]
    async fn test_graceful_shutdown_faults_pending_calls_and_closes() {
        let (handle, router) = start_router();
        let mut controller = TestAgent::connect(&handle, CRED_CONTROLLER, None).await.unwrap();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();

        let call_id = controller
            .call(driver.identity(), "set_point", &[])
            .await
            .unwrap();
        assert!(driver.recv_within(DELIVERY_WAIT).await.is_some());

        handle.shutdown().await.unwrap();
        router.await.unwrap();

        let fault = controller.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(fault.subsystem, Subsystem::RpcFault);
        assert_eq!(fault.id, call_id);
        assert_eq!(fault.arg_str(0), Some("peer-gone"));
        assert!(controller.recv_within(DELIVERY_WAIT).await.is_none());
    }

    // =========================================================
    // TCP end-to-end
    // =========================================================

    #[tokio::test]
    async fn test_pubsub_flow_over_tcp() {
        let (handle, _router) = start_router();
        let transport = TcpTransport::bind("127.0.0.1:0", handle.clone(), 16)
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        tokio::spawn(transport.serve());

        let mut driver = TcpClient::connect(addr).await.unwrap();
        let mut historian = TcpClient::connect(addr).await.unwrap();

        let drv1 = Identity::new("drv1").unwrap();
        let hist1 = Identity::new("hist1").unwrap();

        let hello = Envelope::to_router(drv1.clone(), Subsystem::Hello)
            .with_id("hs-1")
            .with_args(vec![CRED_DRIVER.as_bytes().to_vec()]);
        driver.send(&hello).await.unwrap();
        assert_eq!(
            driver.recv().await.unwrap().unwrap().subsystem,
            Subsystem::Welcome
        );

        let hello = Envelope::to_router(hist1.clone(), Subsystem::Hello)
            .with_id("hs-1")
            .with_args(vec![CRED_HISTORIAN.as_bytes().to_vec()]);
        historian.send(&hello).await.unwrap();
        assert_eq!(
            historian.recv().await.unwrap().unwrap().subsystem,
            Subsystem::Welcome
        );

        let sub = Envelope::to_router(hist1, Subsystem::Subscribe)
            .with_args(vec![b"devices/#".to_vec()]);
        historian.send(&sub).await.unwrap();

        // Publish after the subscribe has been dispatched; a router-level
        // ping round-trip orders the two connections' traffic.
        let ping = Envelope::to_router(Identity::new("hist1").unwrap(), Subsystem::Ping);
        historian.send(&ping).await.unwrap();
        assert_eq!(
            historian.recv().await.unwrap().unwrap().subsystem,
            Subsystem::Pong
        );

        let publish = Envelope::to_router(drv1, Subsystem::Publish)
            .with_args(vec![b"devices/b1/temp".to_vec(), b"21.5".to_vec()]);
        driver.send(&publish).await.unwrap();

        let delivery = historian.recv().await.unwrap().unwrap();
        assert_eq!(delivery.subsystem, Subsystem::Publish);
        assert_eq!(delivery.sender.as_str(), "drv1");
        assert_eq!(delivery.arg_str(0), Some("devices/b1/temp"));
        assert_eq!(delivery.args[1], b"21.5".to_vec());
    }
}
