use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::node::DefaultNode;

/// Name used when a resource is entered without an explicit context.
pub const DEFAULT_CONTEXT_NAME: &str = "default_context";

/// Per-thread invocation scope: names the entry point into the application,
/// carries the calling origin and anchors the invocation tree under the
/// context's entrance node.
#[derive(Debug)]
pub struct Context {
    name: Arc<str>,
    origin: Option<Arc<str>>,
    entrance: Arc<DefaultNode>,
    pub(crate) stack: Vec<EntryFrame>,
}

/// Stack record of one live entry, used for parent-node resolution and LIFO
/// verification on exit.
#[derive(Debug)]
pub(crate) struct EntryFrame {
    pub id: u64,
    pub node: Arc<DefaultNode>,
}

impl Context {
    pub(crate) fn new(name: Arc<str>, origin: Option<Arc<str>>, entrance: Arc<DefaultNode>) -> Self {
        Self {
            name,
            origin,
            entrance,
            stack: Vec::new(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn origin(&self) -> Option<&Arc<str>> {
        self.origin.as_ref()
    }

    pub(crate) fn entrance(&self) -> &Arc<DefaultNode> {
        &self.entrance
    }

    pub(crate) fn is_default(&self) -> bool {
        &*self.name == DEFAULT_CONTEXT_NAME
    }

    /// The node of the innermost live entry, if any.
    pub(crate) fn current_node(&self) -> Option<&Arc<DefaultNode>> {
        self.stack.last().map(|frame| &frame.node)
    }
}

thread_local! {
    static CONTEXTS: RefCell<HashMap<u64, Context>> = RefCell::new(HashMap::new());
}

/// Thread-local context access scoped to one runtime, so independent runtimes
/// in a single thread (the norm in tests) never observe each other's state.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContextStore {
    runtime_id: u64,
}

impl ContextStore {
    pub fn new(runtime_id: u64) -> Self {
        Self { runtime_id }
    }

    pub fn is_present(&self) -> bool {
        CONTEXTS.with(|c| c.borrow().contains_key(&self.runtime_id))
    }

    /// Installs `ctx` unless this thread already has one for the runtime.
    pub fn install_if_absent(&self, ctx: impl FnOnce() -> Context) {
        CONTEXTS.with(|c| {
            c.borrow_mut().entry(self.runtime_id).or_insert_with(ctx);
        });
    }

    pub fn with<R>(&self, f: impl FnOnce(Option<&mut Context>) -> R) -> R {
        CONTEXTS.with(|c| f(c.borrow_mut().get_mut(&self.runtime_id)))
    }

    /// Like [`Self::with`], installing a fresh context first when the thread
    /// has none.
    pub fn with_installed<R>(
        &self,
        make: impl FnOnce() -> Context,
        f: impl FnOnce(&mut Context) -> R,
    ) -> R {
        CONTEXTS.with(|c| {
            let mut map = c.borrow_mut();
            f(map.entry(self.runtime_id).or_insert_with(make))
        })
    }

    pub fn clear(&self) {
        CONTEXTS.with(|c| {
            c.borrow_mut().remove(&self.runtime_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::node::NodeKind;
    use crate::resource::Resource;

    fn entrance(name: &str) -> Arc<DefaultNode> {
        let (clock, _mock) = Clock::mock();
        Arc::new(DefaultNode::new(
            Resource::inbound(name),
            NodeKind::Entrance,
            clock,
            2,
            1_000,
        ))
    }

    #[test]
    fn stores_with_different_runtime_ids_are_isolated() {
        let a = ContextStore::new(901);
        let b = ContextStore::new(902);

        a.install_if_absent(|| Context::new(Arc::from("ctx-a"), None, entrance("ctx-a")));
        assert!(a.is_present());
        assert!(!b.is_present());

        a.clear();
        assert!(!a.is_present());
    }

    #[test]
    fn install_does_not_replace_an_existing_context() {
        let store = ContextStore::new(903);
        store.install_if_absent(|| Context::new(Arc::from("first"), None, entrance("first")));
        store.install_if_absent(|| Context::new(Arc::from("second"), None, entrance("second")));

        store.with(|ctx| {
            assert_eq!(&**ctx.unwrap().name(), "first");
        });
        store.clear();
    }
}
