use std::any::{type_name, Any};

use serde::{de::DeserializeOwned, Serialize};

use crate::{AcceptsPending, HolderError};

/// Types usable as argument or reply of an RPC method. `Default` gives the zero value holders start
/// from, so container replies begin empty rather than absent.
pub trait Message: Default + Serialize + DeserializeOwned + Send + 'static {}

impl<T: Default + Serialize + DeserializeOwned + Send + 'static> Message for T {}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Any + Send>, bincode::Error>;
type EncodeFn = fn(&(dyn Any + Send)) -> Result<Vec<u8>, bincode::Error>;
type PendingProbe = fn(&mut (dyn Any + Send)) -> Option<&mut dyn AcceptsPending>;

fn decode_as<A: Message>(bytes: &[u8]) -> Result<Box<dyn Any + Send>, bincode::Error> {
    bincode::deserialize::<A>(bytes).map(|value| Box::new(value) as Box<dyn Any + Send>)
}

fn encode_as<P: Message>(value: &(dyn Any + Send)) -> Result<Vec<u8>, bincode::Error> {
    match value.downcast_ref::<P>() {
        Some(value) => bincode::serialize(value),
        None => Err(Box::new(bincode::ErrorKind::Custom(format!("reply holder no longer holds {}", type_name::<P>())))),
    }
}

fn probe_pending<A: AcceptsPending + Any>(value: &mut (dyn Any + Send)) -> Option<&mut dyn AcceptsPending> {
    value.downcast_mut::<A>().map(|value| value as &mut dyn AcceptsPending)
}

/// Type-erased argument of one request.
pub struct Argument {
    value: Box<dyn Any + Send>,
    is_value: bool,
    type_name: &'static str,
    decode: DecodeFn,
    accepts_pending: Option<PendingProbe>,
}

impl Argument {
    /// Zero value of `A`. `is_value` tells the transport the method takes the argument by value.
    pub fn zero<A: Message>(is_value: bool) -> Self {
        Self::with_value(A::default(), is_value)
    }

    pub fn new<A: Message>(value: A) -> Self {
        Self::with_value(value, false)
    }

    fn with_value<A: Message>(value: A, is_value: bool) -> Self {
        Self {
            value: Box::new(value),
            is_value,
            type_name: type_name::<A>(),
            decode: decode_as::<A>,
            accepts_pending: None,
        }
    }

    pub(crate) fn privileged<A: Message + AcceptsPending>() -> Self {
        let mut argument = Self::zero::<A>(false);
        argument.accepts_pending = Some(probe_pending::<A>);
        argument
    }

    pub fn is_value(&self) -> bool {
        self.is_value
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Replaces the held value with one decoded from `bytes`.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), HolderError> {
        self.value = (self.decode)(bytes).map_err(|source| HolderError::Decode { expected: self.type_name, source })?;
        Ok(())
    }

    pub fn downcast_ref<A: Any>(&self) -> Option<&A> {
        self.value.downcast_ref::<A>()
    }

    pub fn downcast_mut<A: Any>(&mut self) -> Option<&mut A> {
        self.value.downcast_mut::<A>()
    }

    /// Only arguments of privileged methods answer here.
    pub fn accepts_pending(&mut self) -> Option<&mut dyn AcceptsPending> {
        let probe = self.accepts_pending?;
        probe(&mut *self.value)
    }
}

impl std::fmt::Debug for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argument").field("type", &self.type_name).field("is_value", &self.is_value).finish()
    }
}

/// Type-erased reply of one request, always owned by the holder and written through a reference.
pub struct Reply {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
    encode: EncodeFn,
}

impl Reply {
    pub fn zero<P: Message>() -> Self {
        Self::new(P::default())
    }

    pub fn new<P: Message>(value: P) -> Self {
        Self {
            value: Box::new(value),
            type_name: type_name::<P>(),
            encode: encode_as::<P>,
        }
    }

    /// Placeholder reply for responses that carry only an error.
    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn encode(&self) -> Result<Vec<u8>, HolderError> {
        (self.encode)(&*self.value).map_err(|source| HolderError::Encode { expected: self.type_name, source })
    }

    pub fn downcast_ref<P: Any>(&self) -> Option<&P> {
        self.value.downcast_ref::<P>()
    }

    pub fn downcast_mut<P: Any>(&mut self) -> Option<&mut P> {
        self.value.downcast_mut::<P>()
    }

    pub fn take<P: Any>(self) -> Option<P> {
        self.value.downcast::<P>().ok().map(|value| *value)
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply").field("type", &self.type_name).finish()
    }
}

/// Builds fresh holders for one method.
#[derive(Clone, Copy)]
pub struct Factory {
    new_argument: fn() -> Argument,
    new_reply: fn() -> Reply,
}

fn pointer_argument<A: Message>() -> Argument {
    Argument::zero::<A>(false)
}

fn value_argument<A: Message>() -> Argument {
    Argument::zero::<A>(true)
}

fn privileged_argument<A: Message + AcceptsPending>() -> Argument {
    Argument::privileged::<A>()
}

fn zero_reply<P: Message>() -> Reply {
    Reply::zero::<P>()
}

impl Factory {
    pub fn pointer<A: Message, P: Message>() -> Self {
        Self {
            new_argument: pointer_argument::<A>,
            new_reply: zero_reply::<P>,
        }
    }

    pub fn value<A: Message, P: Message>() -> Self {
        Self {
            new_argument: value_argument::<A>,
            new_reply: zero_reply::<P>,
        }
    }

    pub fn privileged<A: Message + AcceptsPending, P: Message>() -> Self {
        Self {
            new_argument: privileged_argument::<A>,
            new_reply: zero_reply::<P>,
        }
    }

    pub fn make_argument(&self) -> (Argument, bool) {
        let argument = (self.new_argument)();
        let is_value = argument.is_value();
        (argument, is_value)
    }

    pub fn make_reply(&self) -> Reply {
        (self.new_reply)()
    }
}
