pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod pool;
pub mod subscription;

pub use dispatcher::{DdqConfig, Dispatcher};
pub use error::DispatchError;
pub use handler::{HandlerFn, HandlerFuture, HandlerRegistry};

#[cfg(test)]
mod tests {
    use super::*;
    use sm_common::{EncodedEnvelope, Filters, Header, Matcher, SmartMessageError};
    use sm_dlq::DeadLetterQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn dlq() -> Arc<DeadLetterQueue> {
        let dir = tempdir().unwrap();
        Arc::new(DeadLetterQueue::new(dir.path().join("dlq.jsonl")).unwrap())
    }

    fn envelope(to: Option<&str>, from: &str) -> EncodedEnvelope {
        let mut header = Header::new("OrderCreated", 1, from);
        header.to = to.map(|s| s.to_string());
        EncodedEnvelope::new(header, b"{}".to_vec())
    }

    #[tokio::test]
    async fn broadcast_and_targeted_scenario() {
        let dispatcher = Dispatcher::new(dlq(), 4);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        dispatcher.register_named_handler(
            "Sub.handle",
            Arc::new(move |_env: EncodedEnvelope| {
                let count = count2.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), SmartMessageError>(())
                })
            }),
        );
        let filters = Filters::new()
            .with_broadcast(true)
            .with_to(vec![Matcher::literal("svc-a")]);
        dispatcher.add("OrderCreated", "Sub.handle", filters, None);

        dispatcher.route(envelope(None, "orders-service")).await;
        dispatcher.route(envelope(Some("svc-a"), "orders-service")).await;
        dispatcher.route(envelope(Some("svc-b"), "orders-service")).await;
        dispatcher.shutdown().await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deduplication_scenario() {
        let dispatcher = Dispatcher::new(dlq(), 4);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        dispatcher.register_named_handler(
            "Sub.handle",
            Arc::new(move |_env: EncodedEnvelope| {
                let count = count2.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), SmartMessageError>(())
                })
            }),
        );
        dispatcher.add("OrderCreated", "Sub.handle", Filters::new(), Some(DdqConfig::default()));

        let env = envelope(None, "orders-service");
        dispatcher.route(env.clone()).await;
        dispatcher.route(env).await;
        dispatcher.shutdown().await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_breaker_routes_to_dlq_after_threshold_failures() {
        let dlq = dlq();
        let dispatcher = Dispatcher::new(dlq.clone(), 4);
        dispatcher.register_named_handler(
            "Sub.handle",
            Arc::new(|_env: EncodedEnvelope| {
                Box::pin(async move { Err(SmartMessageError::Other("handler always fails".into())) })
            }),
        );
        dispatcher.add("OrderCreated", "Sub.handle", Filters::new(), None);

        // message_processor defaults to threshold 3 within 60s.
        for _ in 0..4 {
            let mut header = Header::new("OrderCreated", 1, "orders-service");
            header.to = None;
            dispatcher
                .route(EncodedEnvelope::new(header, b"{}".to_vec()))
                .await;
        }
        dispatcher.shutdown().await.unwrap();

        let stats = dlq.statistics().unwrap();
        assert!(stats.total >= 1);
    }

    #[tokio::test]
    async fn shutdown_completes_quickly_with_no_in_flight_work() {
        let dispatcher = Dispatcher::new(dlq(), 4);
        let start = std::time::Instant::now();
        dispatcher.shutdown().await.unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(3));
    }
}
