//! Observer lists

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An ordered list of observers for values of type `T`
///
/// Callbacks may register further callbacks while being notified; those are
/// only invoked from the next `call()` onwards.
pub struct CallbackManager<T> {
    callbacks: RefCell<Vec<Rc<dyn Fn(T)>>>,
}

impl<T: Clone> CallbackManager<T> {
    pub fn new() -> Self {
        Self {
            callbacks: RefCell::new(Vec::new()),
        }
    }

    /// Register an observer
    pub fn add(&self, callback: impl Fn(T) + 'static) {
        self.callbacks.borrow_mut().push(Rc::new(callback));
    }

    /// Notify every observer in registration order
    pub fn call(&self, value: T) {
        let callbacks: Vec<_> = self.callbacks.borrow().clone();
        for callback in callbacks {
            callback(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }
}

impl<T: Clone> Default for CallbackManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CallbackManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackManager")
            .field("callbacks", &self.callbacks.borrow().len())
            .finish()
    }
}
