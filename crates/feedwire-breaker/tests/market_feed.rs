//! `marketFeed` outage scenario: an upstream that hangs past the call timeout
//! trips the breaker, and later calls are refused without touching the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use feedwire_breaker::{
    BreakerConfig, BreakerError, BreakerEventKind, BreakerHandle, BreakerRegistry, BreakerState,
    Health,
};

fn market_feed_config() -> BreakerConfig {
    BreakerConfig {
        timeout: Duration::from_secs(10),
        error_threshold_pct: 50,
        rolling_buckets: 5,
        rolling_window: Duration::from_secs(60),
        reset_timeout: Duration::from_secs(30),
        volume_threshold: 3,
    }
}

#[tokio::test(start_paused = true)]
async fn three_timeouts_open_the_breaker() {
    let registry = BreakerRegistry::new();
    let mut events = registry.subscribe();
    let network_calls = Arc::new(AtomicU32::new(0));

    let calls = network_calls.clone();
    let breaker = registry
        .create("marketFeed", market_feed_config(), move |symbol: String| {
            let calls = calls.clone();
            async move {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                // Upstream never answers within the timeout.
                tokio::time::sleep(Duration::from_secs(15)).await;
                Ok::<_, anyhow::Error>(format!("{symbol}:22000"))
            }
        })
        .unwrap();

    let start = tokio::time::Instant::now();
    for i in 1..=3 {
        let err = breaker.execute("NIFTY".to_owned()).await.unwrap_err();
        assert_matches!(err, BreakerError::Timeout { .. });
        let expected = if i < 3 {
            BreakerState::Closed
        } else {
            BreakerState::Open
        };
        assert_eq!(breaker.state(), expected, "after failure {i}");
    }
    assert!(start.elapsed() < Duration::from_secs(60));
    assert_eq!(network_calls.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_secs(5)).await;
    let err = breaker.execute("NIFTY".to_owned()).await.unwrap_err();
    assert_matches!(err, BreakerError::Open { ref name } if name == "marketFeed");
    assert!(err.to_string().contains("service degraded"));
    assert_eq!(network_calls.load(Ordering::SeqCst), 3);

    let stats = breaker.stats();
    assert_eq!(stats.timeouts, 3);
    assert_eq!(stats.rejects, 1);
    assert_eq!(stats.opens, 1);
    assert_eq!(registry.health().status, Health::Critical);

    let mut timeouts = 0;
    let mut opened = 0;
    while let Ok(ev) = events.try_recv() {
        match ev.kind {
            BreakerEventKind::Timeout => timeouts += 1,
            BreakerEventKind::Opened => opened += 1,
            _ => {}
        }
    }
    assert_eq!(timeouts, 3);
    assert_eq!(opened, 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_serves_stale_quote_while_open() {
    let registry = BreakerRegistry::new();
    let breaker = registry
        .create_with_fallback(
            "marketFeed",
            market_feed_config(),
            |_: String| async {
                tokio::time::sleep(Duration::from_secs(15)).await;
                Ok::<_, anyhow::Error>(0.0_f64)
            },
            |_: String| async { Ok::<_, anyhow::Error>(21_950.0_f64) },
        )
        .unwrap();

    for _ in 0..3 {
        let _ = breaker.execute("NIFTY".into()).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    let quote = breaker.execute("NIFTY".into()).await.unwrap();
    assert!((quote - 21_950.0).abs() < f64::EPSILON);
    assert_eq!(breaker.stats().fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn recovers_after_reset_timeout() {
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let registry = BreakerRegistry::new();
    let flag = healthy.clone();
    let breaker = registry
        .create("marketFeed", market_feed_config(), move |(): ()| {
            let flag = flag.clone();
            async move {
                if flag.load(Ordering::SeqCst) {
                    Ok(1_u32)
                } else {
                    anyhow::bail!("502 from upstream")
                }
            }
        })
        .unwrap();

    for _ in 0..3 {
        let _ = breaker.execute(()).await;
    }
    assert_eq!(registry.health().status, Health::Critical);

    tokio::time::advance(Duration::from_secs(30)).await;
    healthy.store(true, Ordering::SeqCst);
    assert_eq!(breaker.execute(()).await.unwrap(), 1);
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(registry.health().status, Health::Healthy);
}
