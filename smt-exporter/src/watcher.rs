// SMT Exporter - Configuration file watcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Polls the configuration file and reports when it was rewritten.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// What identifies one version of the file
type Stamp = Option<(SystemTime, u64)>;

async fn stamp(path: &Path) -> Stamp {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Watch `path` every `poll`, calling `on_change` after each rewrite.
///
/// Returns once `on_change` returns `false`. A file that disappears is not
/// a change; its reappearance is.
pub async fn watch_config<F>(path: PathBuf, poll: Duration, mut on_change: F)
where
    F: FnMut() -> bool,
{
    let mut last = stamp(&path).await;
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Watching {} for changes", path.display());

    loop {
        ticker.tick().await;
        let current = stamp(&path).await;
        if current.is_none() || current == last {
            continue;
        }
        debug!("{} changed on disk", path.display());
        last = current;
        if !on_change() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn touch(path: &Path, text: &str, offset_secs: u64) {
        std::fs::write(path, text).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    #[tokio::test]
    async fn test_reports_each_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smt-stats.toml");
        touch(&path, "[handler]\n", 0);

        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        let task = tokio::spawn(watch_config(
            path.clone(),
            Duration::from_millis(10),
            move || seen.fetch_add(1, Ordering::SeqCst) < 1,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(changes.load(Ordering::SeqCst), 0);

        touch(&path, "[handler]\nport = 9000\n", 10);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        // Second change makes the callback return false, ending the watch
        touch(&path, "[handler]\nport = 9001\n", 20);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        let task = tokio::spawn(watch_config(path.clone(), Duration::from_millis(10), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            false
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(changes.load(Ordering::SeqCst), 0);

        touch(&path, "[pushgateway]\nenable = true\n", 0);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }
}
