//! Parameters that are either fixed or computed from trigger arguments

use std::fmt;
use std::rc::Rc;

/// A parameter of type `T` for an automation firing with arguments `A`
///
/// Closures are evaluated every time the value is requested, so they always
/// see the arguments of the execution asking for it.
pub enum TemplatableValue<T, A = ()> {
    /// No value configured
    None,
    /// A literal value
    Value(T),
    /// Computed from the trigger arguments
    Lambda(Rc<dyn Fn(&A) -> T>),
}

impl<T, A> TemplatableValue<T, A> {
    /// Create a value computed by `f`
    pub fn from_fn(f: impl Fn(&A) -> T + 'static) -> Self {
        Self::Lambda(Rc::new(f))
    }

    /// Whether a literal or closure was configured
    pub fn has_value(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Resolve the value, if one was configured
    pub fn optional_value(&self, args: &A) -> Option<T>
    where
        T: Clone,
    {
        match self {
            Self::None => None,
            Self::Value(v) => Some(v.clone()),
            Self::Lambda(f) => Some(f(args)),
        }
    }

    /// Resolve the value, falling back to `T::default()` when unset
    pub fn value(&self, args: &A) -> T
    where
        T: Clone + Default,
    {
        self.optional_value(args).unwrap_or_default()
    }

    /// Resolve the value, falling back to `default` when unset
    pub fn value_or(&self, args: &A, default: T) -> T
    where
        T: Clone,
    {
        self.optional_value(args).unwrap_or(default)
    }
}

impl<T, A> Default for TemplatableValue<T, A> {
    fn default() -> Self {
        Self::None
    }
}

impl<T: Clone, A> Clone for TemplatableValue<T, A> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Value(v) => Self::Value(v.clone()),
            Self::Lambda(f) => Self::Lambda(f.clone()),
        }
    }
}

impl<T, A> From<T> for TemplatableValue<T, A> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: fmt::Debug, A> fmt::Debug for TemplatableValue<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Lambda(_) => f.write_str("Lambda(..)"),
        }
    }
}
