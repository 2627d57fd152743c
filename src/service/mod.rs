//! Service registry - named method tables with typed dispatch.
//!
//! A [`Service`] maps method names to erased async handlers. Registration is
//! explicit: each handler takes one deserializable argument value and
//! resolves to `Result<Reply, String>`, where the `Err` string is the
//! user-level failure carried back to the caller in the response header.
//!
//! The erased entry decodes arguments and encodes replies under whatever
//! codec the session negotiated, so one registration serves every session.
//!
//! # Example
//!
//! ```
//! use geerpc::Service;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i64, num2: i64 }
//!
//! let service = Service::builder("Foo")
//!     .method("Sum", |args: Args| async move {
//!         Ok::<i64, String>(args.num1 + args.num2)
//!     })
//!     .build();
//!
//! assert_eq!(service.name(), "Foo");
//! assert!(service.method("Sum").is_some());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};

/// Boxed future for erased handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Erased method handler: decode args, invoke, encode reply.
trait ErasedMethod: Send + Sync {
    fn invoke(&self, kind: CodecKind, args: Bytes) -> BoxFuture<'static, Result<Vec<u8>>>;
}

/// Wrapper that materializes typed argument and reply values around a
/// user handler.
struct TypedMethod<F, A, R, Fut>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, String>> + Send + 'static,
{
    handler: F,
    _marker: PhantomData<fn(A) -> (R, Fut)>,
}

impl<F, A, R, Fut> ErasedMethod for TypedMethod<F, A, R, Fut>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, String>> + Send + 'static,
{
    fn invoke(&self, kind: CodecKind, args: Bytes) -> BoxFuture<'static, Result<Vec<u8>>> {
        let parsed: A = match kind.decode(&args) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(parsed);
        Box::pin(async move {
            match fut.await {
                Ok(reply) => kind.encode(&reply),
                Err(msg) => Err(RpcError::User(msg)),
            }
        })
    }
}

/// A registered method: handler plus introspection data for the debug page.
pub struct Method {
    name: String,
    args_type: &'static str,
    reply_type: &'static str,
    calls: AtomicU64,
    inner: Box<dyn ErasedMethod>,
}

impl Method {
    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name of the argument value.
    pub fn args_type(&self) -> &'static str {
        self.args_type
    }

    /// Type name of the reply value.
    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// How many times this method has been invoked.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// An addressable collection of methods, built once and immutable after.
pub struct Service {
    name: String,
    methods: HashMap<String, Method>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Service {
    /// Start building a service with the given name.
    pub fn builder(name: &str) -> ServiceBuilder {
        ServiceBuilder {
            name: name.to_string(),
            methods: HashMap::new(),
        }
    }

    /// Service name (the `<Service>` half of `service_method`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Iterate registered methods (debug page).
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.values()
    }

    /// Invoke `method` with already-encoded arguments.
    ///
    /// Increments the method's call counter, decodes the arguments under
    /// `kind`, awaits the handler and returns the encoded reply. A handler
    /// error surfaces as [`RpcError::User`].
    pub async fn call(&self, method: &str, kind: CodecKind, args: Bytes) -> Result<Vec<u8>> {
        let entry = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound(method.to_string()))?;
        entry.calls.fetch_add(1, Ordering::Relaxed);
        entry.inner.invoke(kind, args).await
    }
}

/// Builder collecting method registrations for a [`Service`].
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Method>,
}

impl ServiceBuilder {
    /// Register a method handler.
    ///
    /// The handler receives the deserialized argument value and resolves to
    /// `Ok(reply)` or `Err(message)`; the message crosses the wire as the
    /// response header's `err` field. Re-registering a name replaces the
    /// earlier handler.
    pub fn method<F, A, R, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, String>> + Send + 'static,
    {
        let entry = Method {
            name: name.to_string(),
            args_type: std::any::type_name::<A>(),
            reply_type: std::any::type_name::<R>(),
            calls: AtomicU64::new(0),
            inner: Box::new(TypedMethod {
                handler,
                _marker: PhantomData,
            }),
        };
        self.methods.insert(name.to_string(), entry);
        self
    }

    /// Finish the service.
    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    fn foo_service() -> Service {
        Service::builder("Foo")
            .method("Sum", |args: Args| async move {
                Ok::<i64, String>(args.num1 + args.num2)
            })
            .build()
    }

    #[tokio::test]
    async fn test_sum_invocation_and_call_count() {
        let service = foo_service();
        let kind = CodecKind::Msgpack;

        let args = kind.encode(&Args { num1: 1, num2: 3 }).unwrap();
        let reply = service.call("Sum", kind, Bytes::from(args)).await.unwrap();

        let sum: i64 = kind.decode(&reply).unwrap();
        assert_eq!(sum, 4);
        assert_eq!(service.method("Sum").unwrap().call_count(), 1);
    }

    #[test]
    fn test_only_registered_methods_are_exposed() {
        let service = foo_service();
        assert_eq!(service.methods().count(), 1);
        assert!(service.method("Sum").is_some());
        assert!(service.method("sum").is_none());
    }

    #[tokio::test]
    async fn test_missing_method_errors() {
        let service = foo_service();
        let err = service
            .call("Mul", CodecKind::Msgpack, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound(name) if name == "Mul"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_user_error() {
        let service = Service::builder("Div")
            .method("Div", |args: Args| async move {
                if args.num2 == 0 {
                    Err("divide by zero".to_string())
                } else {
                    Ok(args.num1 / args.num2)
                }
            })
            .build();

        let kind = CodecKind::Json;
        let args = kind.encode(&Args { num1: 1, num2: 0 }).unwrap();
        let err = service.call("Div", kind, Bytes::from(args)).await.unwrap_err();
        assert!(matches!(err, RpcError::User(msg) if msg == "divide by zero"));

        // The failed invocation still counted.
        assert_eq!(service.method("Div").unwrap().call_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_args_decode_error() {
        let service = foo_service();
        let err = service
            .call("Sum", CodecKind::Json, Bytes::from_static(b"{broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }

    #[test]
    fn test_type_names_recorded_for_debug_page() {
        let service = foo_service();
        let method = service.method("Sum").unwrap();
        assert!(method.args_type().ends_with("Args"));
        assert_eq!(method.reply_type(), "i64");
    }
}
