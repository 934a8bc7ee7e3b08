//! Bounded-parallel apply preserving input order.

use std::future::Future;

use futures_util::stream::{self, StreamExt};

/// Apply `f` to every item with at most `concurrency` calls in flight,
/// returning results aligned to input order.
///
/// Failures are returned as values rather than aborting the batch, so a
/// caller can classify each item's outcome individually.
pub async fn map_bounded<T, U, E, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    f: F,
) -> Vec<Result<U, E>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U, E>>,
{
    stream::iter(items.into_iter().map(f))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn preserves_input_order() {
        // Later items finish earlier; results must still align to input.
        let items: Vec<u64> = (0..8).collect();
        let out = map_bounded(items, 8, |i| async move {
            tokio::time::sleep(std::time::Duration::from_millis(40 - 5 * i)).await;
            Ok::<_, ()>(i)
        })
        .await;
        let values: Vec<u64> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn errors_are_values() {
        let out = map_bounded(vec![1, 2, 3], 2, |i| async move {
            if i == 2 {
                Err(format!("item {i}"))
            } else {
                Ok(i)
            }
        })
        .await;
        assert_eq!(out, vec![Ok(1), Err("item 2".to_string()), Ok(3)]);
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);
        let items: Vec<u32> = (0..16).collect();
        let _ = map_bounded(items, 3, |_| async {
            let now = IN_FLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
            PEAK.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, ()>(())
        })
        .await;
        assert!(PEAK.load(Ordering::SeqCst) <= 3);
    }
}
