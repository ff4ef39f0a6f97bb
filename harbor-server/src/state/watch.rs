//! Watch sets
//!
//! A [`WatchSet`] records which tables a read touched. Awaiting
//! [`WatchSet::changed`] resolves once any of those tables was written after
//! the read. Wakeups are coarse (per table), so callers must re-query and
//! re-evaluate instead of assuming what changed.

use tokio::sync::watch;

/// Tables tracked by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Jobs,
    Runners,
    Tasks,
    Projects,
    OnDemandConfigs,
    ConfigVars,
}

impl Table {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        match self {
            Table::Jobs => 0,
            Table::Runners => 1,
            Table::Tasks => 2,
            Table::Projects => 3,
            Table::OnDemandConfigs => 4,
            Table::ConfigVars => 5,
        }
    }
}

/// Write counters for every table, published by the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Versions {
    counters: [u64; Table::COUNT],
}

impl Versions {
    pub fn get(&self, table: Table) -> u64 {
        self.counters[table.index()]
    }

    pub fn bump(&mut self, table: Table) {
        let slot = &mut self.counters[table.index()];
        *slot = slot.wrapping_add(1);
    }
}

#[derive(Debug, Default)]
pub struct WatchSet {
    rx: Option<watch::Receiver<Versions>>,
    watched: Vec<(Table, u64)>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `table` as of the version currently published
    /// on `rx`. Must be called while the store's write lock is held so the
    /// snapshot matches the data that was read.
    pub fn track(&mut self, table: Table, rx: watch::Receiver<Versions>) {
        let version = rx.borrow().get(table);
        if !self.watched.iter().any(|(t, _)| *t == table) {
            self.watched.push((table, version));
        }
        if self.rx.is_none() {
            self.rx = Some(rx);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    /// Resolves once a watched table changed. Never resolves for an empty
    /// set or after the store is dropped. Cancel-safe.
    pub async fn changed(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            let fired = {
                let current = rx.borrow_and_update();
                self.watched
                    .iter()
                    .any(|(table, version)| current.get(*table) != *version)
            };
            if fired {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_changed_fires_on_watched_table() {
        let (tx, _rx) = watch::channel(Versions::default());
        let mut ws = WatchSet::new();
        ws.track(Table::Jobs, tx.subscribe());

        tx.send_modify(|v| v.bump(Table::Jobs));

        tokio::time::timeout(Duration::from_secs(1), ws.changed())
            .await
            .expect("watch should fire");
    }

    #[tokio::test]
    async fn test_changed_ignores_other_tables() {
        let (tx, _rx) = watch::channel(Versions::default());
        let mut ws = WatchSet::new();
        ws.track(Table::Jobs, tx.subscribe());

        tx.send_modify(|v| v.bump(Table::Runners));

        let result = tokio::time::timeout(Duration::from_millis(50), ws.changed()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_set_never_fires() {
        let mut ws = WatchSet::new();
        assert!(ws.is_empty());
        let result = tokio::time::timeout(Duration::from_millis(20), ws.changed()).await;
        assert!(result.is_err());
    }
}
