use crate::{
    error::RemoteError,
    interface::{InterfaceDescriptor, MethodKey},
    net::codec::CodecError,
    types::{Decode, Encode, Type, Value},
};
use futures::future::BoxFuture;
use std::{collections::BTreeMap, future::Future, sync::Arc};
use thiserror::Error;

type Handler<I> =
    Arc<dyn Fn(Arc<I>, Vec<Value>) -> BoxFuture<'static, CallResult> + Send + Sync + 'static>;

/// Maps each [`MethodKey`] of a remote interface to a handler invoking it on a target `I`.
///
/// Handlers are registered with [`add`](Dispatcher::add), normally by the code that
/// [`remote_interface!`](crate::remote_interface) generates.
pub struct Dispatcher<I: ?Sized> {
    methods: BTreeMap<MethodKey, Handler<I>>,
}

impl<I: ?Sized> Default for Dispatcher<I> {
    fn default() -> Self {
        Self {
            methods: BTreeMap::new(),
        }
    }
}

impl<I: ?Sized + Send + Sync + 'static> Dispatcher<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F, Fut>(&mut self, selector: &str, param_types: Vec<Type>, handler: F)
    where
        F: Fn(Arc<I>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        let key = MethodKey::new(selector, param_types);
        let handler: Handler<I> = Arc::new(
            move |target: Arc<I>, args: Vec<Value>| -> BoxFuture<'static, CallResult> {
                Box::pin(handler(target, args))
            },
        );
        self.methods.insert(key, handler);
    }

    pub fn contains(&self, key: &MethodKey) -> bool {
        self.methods.contains_key(key)
    }

    /// Returns the first method of `interface` that has no handler.
    pub(crate) fn missing<'a>(&self, interface: &'a InterfaceDescriptor) -> Option<&'a MethodKey> {
        interface
            .methods()
            .iter()
            .map(|m| &m.key)
            .find(|key| !self.contains(key))
    }

    pub(crate) async fn call(&self, target: Arc<I>, key: MethodKey, args: Vec<Value>) -> CallResult {
        let handler = self
            .methods
            .get(&key)
            .ok_or(DispatchError::NoSuchMethod(key))?;
        handler(target, args).await
    }
}

pub type CallResult = Result<Value, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no method {0}")]
    NoSuchMethod(MethodKey),

    #[error("calling method: {0}")]
    CallError(#[from] CallError),

    #[error("method raised: {0}")]
    Raised(RemoteError),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("argument mismatch: {0}")]
    Domain(CodecError),

    #[error("(BUG in implementation) return value mismatch: {0}")]
    Range(CodecError),
}

/// Decodes the argument list of a call, one parameter at a time.
pub struct Arguments {
    args: std::vec::IntoIter<Value>,
    expected: usize,
    taken: usize,
}

impl Arguments {
    pub fn new(args: Vec<Value>, expected: usize) -> Result<Self, DispatchError> {
        if args.len() != expected {
            let found = args.len();
            return Err(CallError::Domain(CodecError::Arity { expected, found }).into());
        }
        Ok(Self {
            args: args.into_iter(),
            expected,
            taken: 0,
        })
    }

    pub fn next<T: Decode>(&mut self) -> Result<T, DispatchError> {
        let wanted = self.taken + 1;
        let arg = self.args.next().ok_or(CallError::Domain(CodecError::Arity {
            expected: wanted,
            found: self.expected,
        }))?;
        self.taken = wanted;
        Ok(T::decode(arg).map_err(CallError::Domain)?)
    }
}

pub fn encode_return<R: Encode>(retval: R) -> CallResult {
    Ok(retval.encode().map_err(CallError::Range)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    struct Counter(i64);

    fn dispatcher() -> Dispatcher<Counter> {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add("add", vec![Type::I64], |target: Arc<Counter>, args| async move {
            let mut args = Arguments::new(args, 1)?;
            let n: i64 = args.next()?;
            encode_return(target.0 + n)
        });
        dispatcher.add("fail", vec![], |_target: Arc<Counter>, args| async move {
            Arguments::new(args, 0)?;
            Err::<Value, _>(DispatchError::Raised(TransportError::NoReply.into()))
        });
        dispatcher
    }

    #[tokio::test]
    async fn dispatches_by_selector_and_types() {
        let d = dispatcher();
        let target = Arc::new(Counter(40));
        let val = d
            .call(target, MethodKey::new("add", vec![Type::I64]), vec![Value::I64(2)])
            .await
            .unwrap();
        assert_eq!(val, Value::I64(42));
    }

    #[tokio::test]
    async fn unknown_overload_is_no_such_method() {
        let d = dispatcher();
        let err = d
            .call(
                Arc::new(Counter(0)),
                MethodKey::new("add", vec![Type::I32]),
                vec![Value::I32(2)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoSuchMethod(k) if k.selector == "add"));
    }

    #[tokio::test]
    async fn bad_arguments_are_domain_errors() {
        let d = dispatcher();
        let key = MethodKey::new("add", vec![Type::I64]);
        let wrong_type = d
            .call(Arc::new(Counter(0)), key.clone(), vec![Value::Bool(true)])
            .await
            .unwrap_err();
        assert!(matches!(
            wrong_type,
            DispatchError::CallError(CallError::Domain(CodecError::TypeMismatch(_)))
        ));

        let wrong_arity = d.call(Arc::new(Counter(0)), key, vec![]).await.unwrap_err();
        assert!(matches!(
            wrong_arity,
            DispatchError::CallError(CallError::Domain(CodecError::Arity { expected: 1, found: 0 }))
        ));
    }

    #[test]
    fn reading_past_the_arguments_reports_real_counts() {
        let mut args = Arguments::new(vec![Value::I32(1), Value::I32(2)], 2).unwrap();
        assert_eq!(args.next::<i32>().unwrap(), 1);
        assert_eq!(args.next::<i32>().unwrap(), 2);
        let err = args.next::<i32>().unwrap_err();
        assert!(matches!(
            err,
            DispatchError::CallError(CallError::Domain(CodecError::Arity { expected: 3, found: 2 }))
        ));
    }

    #[tokio::test]
    async fn raised_errors_pass_through() {
        let d = dispatcher();
        let err = d
            .call(Arc::new(Counter(0)), MethodKey::new("fail", vec![]), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Raised(e) if e.is_transport()));
    }
}
