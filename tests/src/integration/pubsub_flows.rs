//! # Pubsub Integration Flows
//!
//! Fan-out, capability enforcement, credential hot-reload, and the
//! back-pressure policy, exercised end-to-end over the in-process
//! transport.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use gridbus_router::CredentialStore;
    use gridbus_transport::TestAgent;
    use gridbus_types::Subsystem;

    // =========================================================
    // Fan-out and matching
    // =========================================================

    #[tokio::test]
    async fn test_publish_reaches_all_matching_subscribers() {
        let (handle, _router) = start_router();
        let driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();
        let mut console = TestAgent::connect(&handle, CRED_CONSOLE, None).await.unwrap();

        historian.subscribe("devices/#").await.unwrap();
        console.subscribe("devices/b1/temp").await.unwrap();

        driver.publish("devices/b1/temp", b"21.5").await.unwrap();

        for agent in [&mut historian, &mut console] {
            let delivery = agent.recv_within(DELIVERY_WAIT).await.unwrap();
            assert_eq!(delivery.subsystem, Subsystem::Publish);
            assert_eq!(delivery.sender.as_str(), "drv1");
            assert_eq!(delivery.arg_str(0), Some("devices/b1/temp"));
            assert_eq!(delivery.args[1], b"21.5".to_vec());
        }
    }

    #[tokio::test]
    async fn test_exact_subscription_does_not_match_siblings() {
        let (handle, _router) = start_router();
        let driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut console = TestAgent::connect(&handle, CRED_CONSOLE, None).await.unwrap();

        console.subscribe("devices/b1/temp").await.unwrap();
        driver.publish("devices/b1/humidity", b"40").await.unwrap();
        console.expect_silence(SILENCE_WAIT).await.unwrap();

        driver.publish("devices/b1/temp", b"21.5").await.unwrap();
        let delivery = console.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(delivery.arg_str(0), Some("devices/b1/temp"));
    }

    #[tokio::test]
    async fn test_duplicate_subscription_yields_single_delivery() {
        let (handle, _router) = start_router();
        let driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();

        historian.subscribe("devices/#").await.unwrap();
        historian.subscribe("devices/#").await.unwrap();

        driver.publish("devices/b1/temp", b"21.5").await.unwrap();
        let delivery = historian.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(delivery.subsystem, Subsystem::Publish);
        historian.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_deliveries() {
        let (handle, _router) = start_router();
        let driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();

        historian.subscribe("devices/#").await.unwrap();
        driver.publish("devices/b1/temp", b"first").await.unwrap();
        assert!(historian.recv_within(DELIVERY_WAIT).await.is_some());

        historian.unsubscribe("devices/#").await.unwrap();
        driver.publish("devices/b1/temp", b"second").await.unwrap();
        historian.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    // =========================================================
    // Capability enforcement
    // =========================================================

    #[tokio::test]
    async fn test_publish_without_capability_is_denied() {
        let (handle, _router) = start_router();
        let mut no_caps = TestAgent::connect(&handle, CRED_NO_CAPS, None).await.unwrap();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();
        historian.subscribe("devices/#").await.unwrap();

        no_caps.publish("devices/b1/temp", b"spoof").await.unwrap();

        let error = no_caps.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(error.subsystem, Subsystem::Error);
        assert_eq!(error.arg_str(0), Some("capability-denied"));
        historian.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_without_capability_is_denied() {
        let (handle, _router) = start_router();
        let driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut no_caps = TestAgent::connect(&handle, CRED_NO_CAPS, None).await.unwrap();

        no_caps.subscribe("devices/#").await.unwrap();
        let error = no_caps.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(error.subsystem, Subsystem::Error);
        assert_eq!(error.arg_str(0), Some("capability-denied"));

        driver.publish("devices/b1/temp", b"21.5").await.unwrap();
        no_caps.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_without_capability_is_denied() {
        let (handle, _router) = start_router();
        let mut no_caps = TestAgent::connect(&handle, CRED_NO_CAPS, None).await.unwrap();

        // Unsubscribe is gated by the same subscribe capability.
        no_caps.unsubscribe("devices/#").await.unwrap();
        let error = no_caps.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(error.subsystem, Subsystem::Error);
        assert_eq!(error.arg_str(0), Some("capability-denied"));
    }

    #[tokio::test]
    async fn test_group_capabilities_grant_operations() {
        // hist1 has no direct capabilities; everything comes from the
        // historians group, including publish on archive topics.
        let (handle, _router) = start_router();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();

        historian.subscribe("devices/#").await.unwrap();
        historian.publish("archive/daily/rollup", b"{}").await.unwrap();

        // Both operations are group-granted: no error frame comes back.
        historian.expect_silence(SILENCE_WAIT).await.unwrap();

        // A topic outside every group grant is still refused.
        historian.publish("devices/b1/temp", b"x").await.unwrap();
        let error = historian.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(error.subsystem, Subsystem::Error);
        assert_eq!(error.arg_str(0), Some("capability-denied"));
    }

    // =========================================================
    // Hot reload
    // =========================================================

    #[tokio::test]
    async fn test_credential_reload_revokes_on_next_publish() {
        let (handle, _router) = start_router();
        let mut driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();
        historian.subscribe("devices/#").await.unwrap();

        driver.publish("devices/b1/temp", b"before").await.unwrap();
        assert!(historian.recv_within(DELIVERY_WAIT).await.is_some());

        // Same population, but drv1 loses its publish capability.
        let revoked = CredentialStore::parse(
            r#"{
                "credentials": {
                    "k-drv": { "identity": "drv1", "capabilities": ["subscribe:control/#"] },
                    "k-hist": { "identity": "hist1", "groups": ["historians"] }
                },
                "groups": {
                    "historians": ["subscribe:devices/#"]
                }
            }"#,
        )
        .unwrap();
        handle.reload_credentials(revoked).await.unwrap();

        driver.publish("devices/b1/temp", b"after").await.unwrap();
        let error = driver.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(error.subsystem, Subsystem::Error);
        assert_eq!(error.arg_str(0), Some("capability-denied"));
        historian.expect_silence(SILENCE_WAIT).await.unwrap();
    }

    // =========================================================
    // Back-pressure
    // =========================================================

    #[tokio::test]
    async fn test_stalled_subscriber_drops_without_blocking_others() {
        let (handle, _router) = start_router();
        let driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();
        let mut console = TestAgent::connect(&handle, CRED_CONSOLE, None).await.unwrap();
        historian.subscribe("devices/#").await.unwrap();
        console.subscribe("devices/#").await.unwrap();

        // The console never drains; its queue holds TEST_QUEUE_CAPACITY
        // deliveries and the rest are dropped. The historian drains as it
        // goes and must see every message.
        let total = gridbus_transport::testing::TEST_QUEUE_CAPACITY + 4;
        for i in 0..total {
            driver
                .publish("devices/b1/temp", format!("{i}").as_bytes())
                .await
                .unwrap();
            let delivery = historian.recv_within(DELIVERY_WAIT).await.unwrap();
            assert_eq!(delivery.arg_str(1), Some(format!("{i}").as_str()));
        }

        // Now drain the console: exactly the queue capacity arrived, in
        // publish order, and the connection survived.
        for i in 0..gridbus_transport::testing::TEST_QUEUE_CAPACITY {
            let delivery = console.recv_within(DELIVERY_WAIT).await.unwrap();
            assert_eq!(delivery.arg_str(1), Some(format!("{i}").as_str()));
        }
        console.expect_silence(SILENCE_WAIT).await.unwrap();

        driver.publish("devices/b1/temp", b"still-here").await.unwrap();
        let delivery = console.recv_within(DELIVERY_WAIT).await.unwrap();
        assert_eq!(delivery.args[1], b"still-here".to_vec());
    }

    // =========================================================
    // Ordering
    // =========================================================

    #[tokio::test]
    async fn test_per_sender_delivery_order_is_preserved() {
        let (handle, _router) = start_router();
        let driver = TestAgent::connect(&handle, CRED_DRIVER, None).await.unwrap();
        let mut historian = TestAgent::connect(&handle, CRED_HISTORIAN, None).await.unwrap();
        historian.subscribe("devices/#").await.unwrap();

        for i in 0..8 {
            driver
                .publish("devices/b1/seq", format!("{i}").as_bytes())
                .await
                .unwrap();
        }
        for i in 0..8 {
            let delivery = historian.recv_within(DELIVERY_WAIT).await.unwrap();
            assert_eq!(delivery.arg_str(1), Some(format!("{i}").as_str()));
        }
    }
}
