//! Invocation targets: the functions a peer may call on this side.
//!
//! A [`Provider`] is a tree of namespaces and async handlers. Inbound
//! requests name a function by dotted path (`"a.b.c"`); resolution descends
//! the tree segment by segment. Handlers are closures, so whatever receiver
//! state a function needs is captured where it is registered.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::frame::RemoteError;

/// An invocable entry in the provider tree.
pub(crate) trait Handler: Send + Sync {
    fn call(&self, parameters: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>>;
}

impl std::fmt::Debug for dyn Handler + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

struct RawHandler<F>(F);

impl<F, Fut> Handler for RawHandler<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
{
    fn call(&self, parameters: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
        Box::pin((self.0)(parameters))
    }
}

/// Typed async functions registrable on a provider.
///
/// Implemented for closures of up to eight serde-compatible positional
/// arguments whose future resolves to `Result<T, RemoteError>`.
pub trait ServiceFn<Args>: Send + Sync + 'static {
    fn invoke(&self, parameters: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>>;
}

struct TypedHandler<F, Args> {
    function: F,
    _marker: PhantomData<fn(Args)>,
}

impl<F, Args> Handler for TypedHandler<F, Args>
where
    F: ServiceFn<Args>,
    Args: 'static,
{
    fn call(&self, parameters: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
        self.function.invoke(parameters)
    }
}

/// Pull the next positional parameter out of a request, decoding it.
///
/// Used by typed handlers and by providers generated with [`service!`];
/// failures become the failure response the remote caller observes.
///
/// [`service!`]: crate::service!
pub fn take_parameter<T: DeserializeOwned>(
    parameters: &mut std::vec::IntoIter<Value>,
    label: &str,
) -> Result<T, RemoteError> {
    let value = parameters
        .next()
        .ok_or_else(|| RemoteError::new("TypeError", format!("missing parameter {label}")))?;
    serde_json::from_value(value)
        .map_err(|error| RemoteError::new("TypeError", format!("invalid parameter {label}: {error}")))
}

macro_rules! impl_service_fn {
    ($($arg:ident),*) => {
        impl<F, Fut, R $(, $arg)*> ServiceFn<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
            R: Serialize,
            $($arg: DeserializeOwned + Send + 'static,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, parameters: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
                let mut parameters = parameters.into_iter();
                let mut position = 0usize;
                $(
                    position += 1;
                    let $arg: $arg = match take_parameter(&mut parameters, &format!("#{position}")) {
                        Ok(value) => value,
                        Err(error) => return Box::pin(std::future::ready(Err(error))),
                    };
                )*
                let future = (self)($($arg),*);
                Box::pin(async move {
                    let value = future.await?;
                    serde_json::to_value(value)
                        .map_err(|error| RemoteError::new("EncodeError", error.to_string()))
                })
            }
        }
    };
}

impl_service_fn!();
impl_service_fn!(A0);
impl_service_fn!(A0, A1);
impl_service_fn!(A0, A1, A2);
impl_service_fn!(A0, A1, A2, A3);
impl_service_fn!(A0, A1, A2, A3, A4);
impl_service_fn!(A0, A1, A2, A3, A4, A5);
impl_service_fn!(A0, A1, A2, A3, A4, A5, A6);
impl_service_fn!(A0, A1, A2, A3, A4, A5, A6, A7);

enum Entry {
    Namespace(Namespace),
    Function(Box<dyn Handler>),
}

#[derive(Default)]
struct Namespace {
    entries: HashMap<String, Entry>,
}

/// The object inbound requests resolve against.
///
/// Built once, then read-only for the life of the link.
pub struct Provider {
    root: Namespace,
}

impl Provider {
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder {
            namespace: Namespace::default(),
        }
    }

    /// Resolve a dotted listener path to a callable.
    pub(crate) fn resolve(&self, listener: &str) -> Result<&dyn Handler, RemoteError> {
        let mut namespace = &self.root;
        let mut segments = listener.split('.').peekable();
        while let Some(segment) = segments.next() {
            match namespace.entries.get(segment) {
                Some(Entry::Function(handler)) if segments.peek().is_none() => {
                    return Ok(handler.as_ref());
                }
                Some(Entry::Namespace(inner)) if segments.peek().is_some() => {
                    namespace = inner;
                }
                _ => break,
            }
        }
        Err(RemoteError::new(
            "Error",
            format!("unable to resolve listener '{listener}' to a function"),
        ))
    }
}

/// Builder for a [`Provider`] tree.
pub struct ProviderBuilder {
    namespace: Namespace,
}

impl ProviderBuilder {
    /// Register a typed function. Parameters arrive positionally and are
    /// decoded one by one; the result is encoded back into a wire value.
    pub fn function<F, Args>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: ServiceFn<Args>,
        Args: 'static,
    {
        self.namespace.entries.insert(
            name.into(),
            Entry::Function(Box::new(TypedHandler {
                function,
                _marker: PhantomData,
            })),
        );
        self
    }

    /// Register a handler working directly on raw wire values.
    pub fn raw<F, Fut>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        self.namespace
            .entries
            .insert(name.into(), Entry::Function(Box::new(RawHandler(function))));
        self
    }

    /// Nest a namespace, one dotted segment deeper.
    pub fn namespace(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(ProviderBuilder) -> ProviderBuilder,
    ) -> Self {
        let nested = build(ProviderBuilder {
            namespace: Namespace::default(),
        });
        self.namespace
            .entries
            .insert(name.into(), Entry::Namespace(nested.namespace));
        self
    }

    pub fn build(self) -> Provider {
        Provider {
            root: self.namespace,
        }
    }
}
