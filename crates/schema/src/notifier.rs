use lucidb_primitives::TableId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// A schema object kind, as carried on a [`SchemaChangeEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaObjectKind {
    Table,
    Index,
    Function,
    Collation,
    Module,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaChangeKind {
    Create,
    Alter,
    Drop,
}

/// A catalog mutation, delivered to subscribers registered via
/// [`ChangeNotifier::subscribe`]. Events are only ever emitted for
/// catalog DDL that has actually committed -- the catalog itself has no
/// notion of uncommitted DDL visibility, mirroring the data engine's
/// post-commit-only event rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaChangeEvent {
    pub kind: SchemaChangeKind,
    pub object: SchemaObjectKind,
    pub name: String,
}

type Subscriber = Arc<dyn Fn(&SchemaChangeEvent) + Send + Sync>;

struct Subscription {
    id: u64,
    /// `None` means "subscribed to everything"; `Some(set)` narrows
    /// delivery to tables in the dependency set (e.g. the tables a view
    /// or a cached plan actually reads), so an unrelated DDL change does
    /// not wake up every subscriber in the system.
    depends_on: Option<HashSet<TableId>>,
    callback: Subscriber,
}

/// Publishes catalog change events to interested subscribers, narrowed by
/// an optional table-level dependency set so a subscriber tracking one
/// table's shape is not woken by DDL on an unrelated table.
#[derive(Default)]
pub struct ChangeNotifier {
    inner: Mutex<NotifierState>,
}

#[derive(Default)]
struct NotifierState {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

pub struct SubscriptionHandle {
    id: u64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every change event, regardless of the tables involved.
    pub fn subscribe_all(&self, callback: impl Fn(&SchemaChangeEvent) + Send + Sync + 'static) -> SubscriptionHandle {
        self.subscribe_inner(None, callback)
    }

    /// Subscribes only to events touching one of `depends_on`.
    pub fn subscribe_dependent(
        &self,
        depends_on: HashSet<TableId>,
        callback: impl Fn(&SchemaChangeEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.subscribe_inner(Some(depends_on), callback)
    }

    fn subscribe_inner(
        &self,
        depends_on: Option<HashSet<TableId>>,
        callback: impl Fn(&SchemaChangeEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let mut state = self.inner.lock().expect("notifier lock poisoned");
        let id = state.next_id;
        state.next_id += 1;
        state.subscriptions.push(Subscription {
            id,
            depends_on,
            callback: Arc::new(callback),
        });
        SubscriptionHandle { id }
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut state = self.inner.lock().expect("notifier lock poisoned");
        state.subscriptions.retain(|s| s.id != handle.id);
    }

    /// Publishes `event`, additionally carrying the table ids it concerns
    /// (empty for function/collation/module events) so dependency-scoped
    /// subscribers can filter.
    pub fn publish(&self, event: SchemaChangeEvent, touches: &[TableId]) {
        let state = self.inner.lock().expect("notifier lock poisoned");
        for sub in &state.subscriptions {
            let interested = match &sub.depends_on {
                None => true,
                Some(deps) => touches.iter().any(|t| deps.contains(t)),
            };
            if interested {
                (sub.callback)(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dependency_scoped_subscriber_ignores_unrelated_table() {
        let notifier = ChangeNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let watched = TableId::new(1);
        let mut deps = HashSet::new();
        deps.insert(watched);
        let _handle = notifier.subscribe_dependent(deps, move |_event| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Alter,
                object: SchemaObjectKind::Table,
                name: "other".into(),
            },
            &[TableId::new(2)],
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Alter,
                object: SchemaObjectKind::Table,
                name: "watched".into(),
            },
            &[watched],
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_all_sees_every_event() {
        let notifier = ChangeNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let _handle = notifier.subscribe_all(move |_event| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Create,
                object: SchemaObjectKind::Function,
                name: "f".into(),
            },
            &[],
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
