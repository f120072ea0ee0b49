//! The unit of work a thread runs.
//!
//! A [`Task`] binds exactly one nullary operation: a plain function, a
//! function with one bound argument, a method bound to a shared receiver, or
//! a closure. It is moved into the thread on `start` and consumed by the
//! single call the thread's entry makes, so it can run at most once.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

/// Which kind of binding a [`Task`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Function,
    Argument,
    Method,
    Closure,
}

trait Invoke: Send {
    fn invoke(self: Box<Self>);
}

struct BoundArgument<T> {
    func: fn(T),
    arg: T,
}

impl<T: Send> Invoke for BoundArgument<T> {
    fn invoke(self: Box<Self>) {
        (self.func)(self.arg)
    }
}

struct BoundMethod<T> {
    receiver: Arc<T>,
    method: fn(&T),
}

impl<T: Send + Sync> Invoke for BoundMethod<T> {
    fn invoke(self: Box<Self>) {
        (self.method)(&self.receiver)
    }
}

enum Binding {
    Function(fn()),
    Argument(Box<dyn Invoke>),
    Method(Box<dyn Invoke>),
    Closure(Box<dyn FnOnce() + Send>),
}

/// A nullary operation run to completion by a thread.
pub struct Task {
    binding: Binding,
}

impl Task {
    /// Binds a plain function.
    pub fn new(func: fn()) -> Self {
        Self {
            binding: Binding::Function(func),
        }
    }

    /// Binds a function together with the argument it will be called with.
    pub fn with_arg<T: Send + 'static>(func: fn(T), arg: T) -> Self {
        Self {
            binding: Binding::Argument(Box::new(BoundArgument { func, arg })),
        }
    }

    /// Binds a method to a shared receiver.
    pub fn method<T: Send + Sync + 'static>(receiver: Arc<T>, method: fn(&T)) -> Self {
        Self {
            binding: Binding::Method(Box::new(BoundMethod { receiver, method })),
        }
    }

    /// Binds an arbitrary closure.
    pub fn from_closure(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            binding: Binding::Closure(Box::new(f)),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self.binding {
            Binding::Function(_) => TaskKind::Function,
            Binding::Argument(_) => TaskKind::Argument,
            Binding::Method(_) => TaskKind::Method,
            Binding::Closure(_) => TaskKind::Closure,
        }
    }

    /// Runs the bound operation, consuming the task.
    pub fn run(self) {
        match self.binding {
            Binding::Function(func) => func(),
            Binding::Argument(bound) | Binding::Method(bound) => bound.invoke(),
            Binding::Closure(f) => f(),
        }
    }
}

impl From<fn()> for Task {
    fn from(func: fn()) -> Self {
        Task::new(func)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("kind", &self.kind()).finish()
    }
}
