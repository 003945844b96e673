//! # Wrapper Facades
//!
//! The factory seam between the interception machinery and the capability
//! interfaces. A facade takes the finished [`Guard`] and produces the object
//! implementing the requested capability set, every method forwarding to the
//! single interception entry point [`Guard::invoke`]. Facades are plain
//! adapter types resolved at compile time; nothing is introspected at
//! runtime. The `facade!` macro writes the adapter for a capability trait's
//! method list.

use crate::guard::Guard;

#[derive(Debug)]
pub enum Error {
    /// The adapter could not be constructed from the guard.
    Assemble(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assemble(msg) => write!(f, "Facade assembly failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Produces the wrapper object for a capability set.
///
/// A failure here is a configuration problem and surfaces from
/// [`GuardBuilder::build`](crate::builder::GuardBuilder::build), never from an
/// individual call.
pub trait Facade<T: Send + Sync + 'static>: Sized {
    /// Assembles the adapter implementing the capability interfaces, routing
    /// every call through `guard`.
    fn assemble(guard: Guard<T>) -> Result<Self>;
}

/// Generates a facade: an adapter struct implementing a capability trait by
/// forwarding every method to the guard's interception entry point.
///
/// The capability trait must be an `#[async_trait]` trait whose methods take
/// `&self` plus owned arguments and return `anyhow::Result<R>` with
/// `R: Default`. The invoking crate needs `async-trait` and `anyhow` as
/// dependencies of its own.
///
/// ```ignore
/// facade! {
///     pub struct SafeThermometer for trait Thermometer {
///         async fn read(&self) -> anyhow::Result<f64>;
///         async fn calibrate(&self, offset: f64) -> anyhow::Result<()>;
///     }
/// }
/// ```
#[macro_export]
macro_rules! facade {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident for trait $capability:path {
            $( async fn $method:ident(&self $(, $arg:ident: $argty:ty)* $(,)?) -> $ret:ty; )*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name<T: $capability + Send + Sync + 'static> {
            guard: $crate::guard::Guard<T>,
        }

        impl<T: $capability + Send + Sync + 'static> ::std::fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_struct(stringify!($name)).finish_non_exhaustive()
            }
        }

        impl<T: $capability + Send + Sync + 'static> $crate::facade::Facade<T> for $name<T> {
            fn assemble(guard: $crate::guard::Guard<T>) -> $crate::facade::Result<Self> {
                Ok(Self { guard })
            }
        }

        #[::async_trait::async_trait]
        impl<T: $capability + Send + Sync + 'static> $capability for $name<T> {
            $(
                async fn $method(&self $(, $arg: $argty)*) -> $ret {
                    self.guard
                        .invoke(stringify!($method), move |target: ::std::sync::Arc<T>| async move {
                            target.$method($($arg),*).await
                        })
                        .await
                }
            )*
        }
    };
}
