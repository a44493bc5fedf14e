use std::time::Duration;

/// Bounded retry policy for read-path collaborator calls (UTXO/fee/nonce/
/// blockhash/balance fetches). Broadcasts are deliberately single-shot; the
/// lifecycle layer never re-sends signed bytes on its own.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of full rounds. Each round tries every endpoint once.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

fn backoff_delay(policy: &RetryPolicy, round: usize) -> Duration {
    let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
    let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base_ms = u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX);
    let mut ms = base_ms.saturating_mul(pow2);
    let max_ms = u64::try_from(policy.max_delay.as_millis()).unwrap_or(u64::MAX);
    if ms > max_ms {
        ms = max_ms;
    }
    let jitter = if cfg!(test) || policy.jitter_max_ms == 0 {
        0
    } else {
        // Avoid holding a non-Send RNG across await points.
        rand::random::<u64>() % policy.jitter_max_ms.saturating_add(1)
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Try `op(endpoint)` across all endpoints in order, for `rounds` rounds,
/// sleeping with exponential backoff + jitter between rounds. Returns the
/// first success or the last error wrapped with `context_label`.
pub async fn with_endpoints<I, T, Fut>(
    endpoints: &[I],
    policy: &RetryPolicy,
    mut op: impl FnMut(&I) -> Fut + Send,
    context_label: &'static str,
) -> eyre::Result<T>
where
    I: Sync,
    Fut: std::future::Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("no endpoints configured");
    }
    if policy.rounds == 0 {
        eyre::bail!("invalid retry policy: rounds=0");
    }

    let mut last_err: Option<eyre::Report> = None;

    for round in 0..policy.rounds {
        for ep in endpoints {
            match op(ep).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }
        if round + 1 < policy.rounds {
            tokio::time::sleep(backoff_delay(policy, round)).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("unknown error"))
        .wrap_err(context_label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn visits_every_endpoint_each_round() -> eyre::Result<()> {
        let endpoints: Vec<i32> = vec![1, 2];
        let policy = RetryPolicy {
            rounds: 2,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            jitter_max_ms: 0,
        };

        let calls: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(vec![]));
        let calls2 = Arc::clone(&calls);

        let res: eyre::Result<()> = with_endpoints(
            &endpoints,
            &policy,
            move |i| {
                let i = *i;
                let calls3 = Arc::clone(&calls2);
                async move {
                    {
                        let mut guard = calls3
                            .lock()
                            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
                        guard.push(i);
                    }
                    eyre::bail!("down")
                }
            },
            "fetch",
        )
        .await;
        assert!(res.is_err());
        let got = calls
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .clone();
        assert_eq!(got, vec![1_i32, 2_i32, 1_i32, 2_i32]);
        Ok(())
    }

    #[tokio::test]
    async fn short_circuits_on_success() -> eyre::Result<()> {
        let endpoints: Vec<String> = vec!["bad".into(), "good".into()];
        let policy = RetryPolicy {
            rounds: 3,
            ..Default::default()
        };

        let out = with_endpoints(
            &endpoints,
            &policy,
            |ep| {
                let ep = ep.clone();
                async move {
                    if ep == "good" {
                        Ok(7_u64)
                    } else {
                        eyre::bail!("unreachable endpoint")
                    }
                }
            },
            "fetch",
        )
        .await?;
        assert_eq!(out, 7);
        Ok(())
    }
}
