//! Action chains
//!
//! An [`ActionList`] is an ordered sequence of [`Action`] nodes. Playing the
//! list starts a new execution at the first node; each node hands the
//! arguments to the following node through a [`Next`] continuation once its
//! work is done, either synchronously or later from a timer callback.
//!
//! Several executions can be in flight at once. Every node counts the
//! executions it currently holds, and a continuation only advances while its
//! node still holds at least one. Stopping the list zeroes those counts, so a
//! continuation that fires after a stop is ignored.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// One step of an action chain
pub trait Action<A: Clone + 'static> {
    /// Synchronous body, used by the default [`play_complex`](Self::play_complex)
    fn play(&self, _args: &A) {}

    /// Run this step and eventually hand `args` on through `next`
    ///
    /// Asynchronous actions keep a clone of `next` and call
    /// [`Next::resume`] when they are done. Every call must resume at most
    /// once.
    fn play_complex(&self, args: A, next: &Next<A>) {
        self.play(&args);
        next.resume(args);
    }

    /// Cancel outstanding work
    ///
    /// Called when the owning list is stopped while this action holds
    /// in-flight executions. Implementations must cancel any timer or poll
    /// that would otherwise call [`Next::resume`] later.
    fn stop(&self) {}
}

struct ActionNode<A: Clone + 'static> {
    num_running: Cell<u32>,
    action: Box<dyn Action<A>>,
}

struct ChainInner<A: Clone + 'static> {
    nodes: RefCell<Vec<Rc<ActionNode<A>>>>,
    tail: RefCell<Option<Rc<dyn Fn(A)>>>,
}

impl<A: Clone + 'static> ChainInner<A> {
    fn node(&self, index: usize) -> Option<Rc<ActionNode<A>>> {
        self.nodes.borrow().get(index).cloned()
    }

    fn play_from(self: &Rc<Self>, index: usize, args: A) {
        match self.node(index) {
            Some(node) => {
                node.num_running.set(node.num_running.get() + 1);
                let next = Next {
                    chain: Rc::downgrade(self),
                    index,
                };
                node.action.play_complex(args, &next);
            }
            None => {
                let tail = self.tail.borrow().clone();
                if let Some(tail) = tail {
                    tail(args);
                }
            }
        }
    }

    fn stop_from(&self, index: usize) {
        let nodes: Vec<_> = self
            .nodes
            .borrow()
            .get(index..)
            .map(<[_]>::to_vec)
            .unwrap_or_default();
        for node in nodes {
            if node.num_running.get() > 0 {
                node.action.stop();
                node.num_running.set(0);
            }
        }
    }
}

/// Continuation handed to [`Action::play_complex`]
///
/// Identifies the node that is completing. Resuming moves one of that node's
/// executions on to the following node.
pub struct Next<A: Clone + 'static> {
    chain: Weak<ChainInner<A>>,
    index: usize,
}

impl<A: Clone + 'static> Clone for Next<A> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            index: self.index,
        }
    }
}

impl<A: Clone + 'static> Next<A> {
    /// Complete one execution of the current node and play the rest of the chain
    ///
    /// Does nothing if the node no longer holds an execution, which is the
    /// case after the list was stopped.
    pub fn resume(&self, args: A) {
        let Some(chain) = self.chain.upgrade() else {
            return;
        };
        let Some(node) = chain.node(self.index) else {
            return;
        };

        let running = node.num_running.get();
        if running == 0 {
            trace!(index = self.index, "Ignoring continuation of stopped action");
            return;
        }
        node.num_running.set(running - 1);
        chain.play_from(self.index + 1, args);
    }

    /// Whether the current node still holds at least one execution
    pub fn is_live(&self) -> bool {
        self.num_running() > 0
    }

    /// Executions currently held by the current node
    pub fn num_running(&self) -> u32 {
        self.chain
            .upgrade()
            .and_then(|chain| chain.node(self.index))
            .map(|node| node.num_running.get())
            .unwrap_or(0)
    }
}

/// An ordered, shareable list of actions
///
/// Cloning yields another handle to the same list.
pub struct ActionList<A: Clone + 'static> {
    inner: Rc<ChainInner<A>>,
}

impl<A: Clone + 'static> ActionList<A> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ChainInner {
                nodes: RefCell::new(Vec::new()),
                tail: RefCell::new(None),
            }),
        }
    }

    /// Append an action to the end of the list
    pub fn add_action(&self, action: impl Action<A> + 'static) {
        self.add_boxed(Box::new(action));
    }

    pub fn add_boxed(&self, action: Box<dyn Action<A>>) {
        self.inner.nodes.borrow_mut().push(Rc::new(ActionNode {
            num_running: Cell::new(0),
            action,
        }));
    }

    pub fn add_actions(&self, actions: impl IntoIterator<Item = Box<dyn Action<A>>>) {
        for action in actions {
            self.add_boxed(action);
        }
    }

    /// Start a new execution at the first action
    pub fn play(&self, args: A) {
        self.inner.play_from(0, args);
    }

    /// Stop every in-flight execution
    pub fn stop(&self) {
        self.inner.stop_from(0);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// Whether any action of the list holds an execution
    pub fn is_running(&self) -> bool {
        self.inner
            .nodes
            .borrow()
            .iter()
            .any(|node| node.num_running.get() > 0)
    }

    /// Number of executions in flight across the whole list
    pub fn num_running(&self) -> u32 {
        self.inner
            .nodes
            .borrow()
            .iter()
            .map(|node| node.num_running.get())
            .sum()
    }

    /// Called with the arguments when an execution runs past the last action
    ///
    /// Nested lists (branches and loop bodies) use this to return control to
    /// the action that owns them.
    pub(crate) fn set_tail(&self, tail: impl Fn(A) + 'static) {
        *self.inner.tail.borrow_mut() = Some(Rc::new(tail));
    }
}

impl<A: Clone + 'static> Clone for ActionList<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Clone + 'static> Default for ActionList<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + 'static> fmt::Debug for ActionList<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionList")
            .field("len", &self.len())
            .field("num_running", &self.num_running())
            .finish()
    }
}
