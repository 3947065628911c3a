use crate::{
    codec::Invocation,
    error::{Result, RpcError},
    registry::Registry,
    types::{Encode, Params, ServiceName, Type, TypeMismatch, Typed, Value},
    Service,
};
use futures::future::{ready, BoxFuture};
use std::{collections::BTreeMap, marker::PhantomData};

/// Maps a service's method names to typed invokers.
///
/// Methods are registered with [`method`], [`async_method`] or [`raw_method`]. Names that exist
/// on the service but must not be called from outside are declared with [`private`].
/// A name can only be registered once.
///
/// [`method`]: DispatchTable::method
/// [`async_method`]: DispatchTable::async_method
/// [`raw_method`]: DispatchTable::raw_method
/// [`private`]: DispatchTable::private
pub struct DispatchTable<S> {
    service: ServiceName,
    methods: BTreeMap<String, Slot<S>>,
}

enum Slot<S> {
    Public(Box<dyn DynamicMethod<S>>),
    Private,
}

/// Declared parameter types and return type of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub returns: Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub signature: Signature,
}

impl<S: Service> DispatchTable<S> {
    pub fn new() -> Self {
        Self {
            service: S::NAME.into(),
            methods: BTreeMap::new(),
        }
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Registers a synchronous method. The signature is inferred from `A` and `R`.
    pub fn method<A, R, F>(&mut self, name: &str, method: F) -> Result<&mut Self>
    where
        A: Params,
        R: Typed + Encode + 'static,
        F: Fn(&mut S, A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let signature = Signature {
            params: A::types(),
            returns: R::rpc_type(),
        };
        self.insert(
            name,
            Slot::Public(Box::new(SyncMethod {
                method,
                signature,
                _types: PhantomData,
            })),
        )
    }

    /// Registers a method whose body awaits, typically on calls to other services.
    ///
    /// The closure's first parameter is only inferred once `S` is known, so a table that starts
    /// with an async method names its service up front:
    ///
    /// ```ignore
    /// let mut table = DispatchTable::<Self>::new();
    /// table.async_method("say_hello", |hello, (): ()| Box::pin(hello.say_hello()))?;
    /// ```
    pub fn async_method<A, R, F>(&mut self, name: &str, method: F) -> Result<&mut Self>
    where
        A: Params,
        R: Typed + Encode + 'static,
        F: for<'s> Fn(&'s mut S, A) -> BoxFuture<'s, anyhow::Result<R>> + Send + Sync + 'static,
    {
        let signature = Signature {
            params: A::types(),
            returns: R::rpc_type(),
        };
        self.insert(
            name,
            Slot::Public(Box::new(AsyncMethod {
                method,
                signature,
                _types: PhantomData,
            })),
        )
    }

    /// Registers a method with an explicit signature. Arguments arrive already converted to
    /// the declared parameter types.
    pub fn raw_method<F>(&mut self, name: &str, signature: Signature, method: F) -> Result<&mut Self>
    where
        F: Fn(&mut S, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(name, Slot::Public(Box::new(RawMethod { method, signature })))
    }

    /// Declares a name that exists on the service but is not part of its public interface.
    pub fn private(&mut self, name: &str) -> Result<&mut Self> {
        self.insert(name, Slot::Private)
    }

    fn insert(&mut self, name: &str, slot: Slot<S>) -> Result<&mut Self> {
        if self.methods.contains_key(name) {
            return Err(RpcError::DuplicateMethod {
                service: self.service.clone(),
                method: name.to_owned(),
            });
        }
        self.methods.insert(name.to_owned(), slot);
        Ok(self)
    }

    /// Public methods, ordered by name.
    pub fn methods(&self) -> Vec<MethodInfo> {
        self.methods
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Public(method) => Some(MethodInfo {
                    name: name.clone(),
                    signature: method.signature().clone(),
                }),
                Slot::Private => None,
            })
            .collect()
    }

    /// Runs a decoded invocation against `service`, converting each text argument to the
    /// declared parameter type first.
    pub async fn dispatch(
        &self,
        service: &mut S,
        invocation: Invocation,
        registry: &Registry,
    ) -> Result<Value> {
        let Invocation { method, args } = invocation;
        let entry = self.entry(&method)?;
        let params = &entry.signature().params;
        check_arity(&method, params.len(), args.len())?;

        let values = args
            .iter()
            .zip(params)
            .enumerate()
            .map(|(index, (text, typ))| convert(&method, index, text, typ, registry))
            .collect::<Result<Vec<_>>>()?;

        invoke(entry, service, &method, values).await
    }

    /// Runs an in-process call with already typed arguments.
    ///
    /// Type references must name a service in `registry`, as they must on the text path.
    pub async fn call(
        &self,
        service: &mut S,
        method: &str,
        args: Vec<Value>,
        registry: &Registry,
    ) -> Result<Value> {
        let entry = self.entry(method)?;
        let params = &entry.signature().params;
        check_arity(method, params.len(), args.len())?;

        for (index, (value, typ)) in args.iter().zip(params).enumerate() {
            if !typ.is_argument() {
                return Err(unsupported_argument(method, index, typ));
            }
            if value.rpc_type() != *typ {
                return Err(RpcError::InvalidArgument {
                    method: method.to_owned(),
                    reason: format!("argument {index} is {}, expected {typ}", value.rpc_type()),
                });
            }
            if let Value::TypeRef(name) = value {
                if !registry.contains(name.as_str()) {
                    return Err(RpcError::TypeResolutionFailed(name.to_string()));
                }
            }
        }

        invoke(entry, service, method, args).await
    }

    fn entry(&self, method: &str) -> Result<&dyn DynamicMethod<S>> {
        match self.methods.get(method) {
            Some(Slot::Public(entry)) => Ok(entry.as_ref()),
            Some(Slot::Private) => Err(RpcError::MethodNotPublic {
                service: self.service.clone(),
                method: method.to_owned(),
            }),
            None => Err(RpcError::MethodNotFound {
                service: self.service.clone(),
                method: method.to_owned(),
            }),
        }
    }
}

impl<S: Service> Default for DispatchTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_arity(method: &str, expected: usize, received: usize) -> Result<()> {
    if expected != received {
        return Err(RpcError::ArgumentCountMismatch {
            method: method.to_owned(),
            expected,
            received,
        });
    }
    Ok(())
}

fn unsupported_argument(method: &str, index: usize, typ: &Type) -> RpcError {
    RpcError::UnsupportedArgumentType {
        method: method.to_owned(),
        index,
        typ: typ.clone(),
    }
}

fn convert(method: &str, index: usize, text: &str, typ: &Type, registry: &Registry) -> Result<Value> {
    match typ {
        Type::TypeRef => registry
            .resolve_type(text)
            .map(Value::TypeRef)
            .ok_or_else(|| RpcError::TypeResolutionFailed(text.to_owned())),
        typ if typ.is_argument() => {
            Value::parse(text, typ).map_err(|e| RpcError::InvalidArgument {
                method: method.to_owned(),
                reason: format!("argument {index}: {e}"),
            })
        }
        typ => Err(unsupported_argument(method, index, typ)),
    }
}

async fn invoke<S>(
    entry: &dyn DynamicMethod<S>,
    service: &mut S,
    method: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let pending = entry
        .call(service, args)
        .map_err(|mismatch| RpcError::InvalidArgument {
            method: method.to_owned(),
            reason: mismatch.to_string(),
        })?;
    pending
        .await
        .map_err(|source| RpcError::HandlerInvocationFailed {
            method: method.to_owned(),
            source,
        })
}

/// A type-erased method, callable with positional values.
trait DynamicMethod<S>: Send + Sync {
    fn signature(&self) -> &Signature;

    fn call<'a>(
        &'a self,
        service: &'a mut S,
        args: Vec<Value>,
    ) -> Result<BoxFuture<'a, anyhow::Result<Value>>, TypeMismatch>;
}

struct SyncMethod<F, A, R> {
    method: F,
    signature: Signature,
    _types: PhantomData<fn(A) -> R>,
}

impl<S, F, A, R> DynamicMethod<S> for SyncMethod<F, A, R>
where
    S: Send + 'static,
    F: Fn(&mut S, A) -> anyhow::Result<R> + Send + Sync + 'static,
    A: Params,
    R: Encode + 'static,
{
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn call<'a>(
        &'a self,
        service: &'a mut S,
        args: Vec<Value>,
    ) -> Result<BoxFuture<'a, anyhow::Result<Value>>, TypeMismatch> {
        let args = A::from_values(args)?;
        let retval = (self.method)(service, args).map(R::encode);
        Ok(Box::pin(ready(retval)))
    }
}

struct AsyncMethod<F, A, R> {
    method: F,
    signature: Signature,
    _types: PhantomData<fn(A) -> R>,
}

impl<S, F, A, R> DynamicMethod<S> for AsyncMethod<F, A, R>
where
    S: Send + 'static,
    F: for<'s> Fn(&'s mut S, A) -> BoxFuture<'s, anyhow::Result<R>> + Send + Sync + 'static,
    A: Params,
    R: Encode + 'static,
{
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn call<'a>(
        &'a self,
        service: &'a mut S,
        args: Vec<Value>,
    ) -> Result<BoxFuture<'a, anyhow::Result<Value>>, TypeMismatch> {
        let args = A::from_values(args)?;
        let pending = (self.method)(service, args);
        Ok(Box::pin(async move { pending.await.map(R::encode) }))
    }
}

struct RawMethod<F> {
    method: F,
    signature: Signature,
}

impl<S, F> DynamicMethod<S> for RawMethod<F>
where
    S: Send + 'static,
    F: Fn(&mut S, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn call<'a>(
        &'a self,
        service: &'a mut S,
        args: Vec<Value>,
    ) -> Result<BoxFuture<'a, anyhow::Result<Value>>, TypeMismatch> {
        Ok(Box::pin(ready((self.method)(service, args))))
    }
}
