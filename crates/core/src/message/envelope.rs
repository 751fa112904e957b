use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::consts::ENVELOPE_VERSION;
use crate::dht::Did;
use crate::error::Error;
use crate::error::Result;

/// Content of an [Envelope].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum EnvelopeBody {
    /// A message for a module of the destination node.
    Direct {
        /// Module id the message is dispatched to.
        module: String,
        /// Handler name inside the module.
        handler: String,
        /// Module specific payload.
        data: Bytes,
    },
    /// An encoded envelope handed to a relay, which unwraps and routes it.
    Relayed {
        /// Bincode of the inner envelope.
        inner: Bytes,
        /// Destination of the inner envelope.
        next_hop: Did,
    },
}

/// The unit routed through the overlay.
/// An envelope is addressed to an id, every node on the way decrements `hops`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Envelope {
    /// Wire version, always [ENVELOPE_VERSION].
    pub version: String,
    /// Node that created the envelope.
    pub src: Did,
    /// Target id, not necessarily the id of a node.
    pub dest: Did,
    /// Relay that unwrapped this envelope, replies are wrapped back to it.
    pub proxy: Option<Did>,
    /// Remaining hand-offs.
    pub hops: u8,
    /// Payload.
    pub body: EnvelopeBody,
}

impl Envelope {
    /// Create an envelope for `module`/`handler` of the node responsible for `dest`.
    pub fn new_direct(
        src: Did,
        dest: Did,
        module: &str,
        handler: &str,
        data: Bytes,
        hops: u8,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION.to_string(),
            src,
            dest,
            proxy: None,
            hops,
            body: EnvelopeBody::Direct {
                module: module.to_string(),
                handler: handler.to_string(),
                data,
            },
        }
    }

    /// Encode `data` with bincode and create a direct envelope.
    pub fn new_send<T>(
        src: Did,
        dest: Did,
        module: &str,
        handler: &str,
        data: &T,
        hops: u8,
    ) -> Result<Self>
    where
        T: Serialize,
    {
        let data = bincode::serialize(data).map_err(Error::BincodeSerialize)?;
        Ok(Self::new_direct(
            src,
            dest,
            module,
            handler,
            data.into(),
            hops,
        ))
    }

    /// Wrap self into an envelope addressed to `relay`.
    /// The source is kept, so the relay knows who asked.
    pub fn wrap_relayed(&self, relay: Did, hops: u8) -> Result<Self> {
        Ok(Self {
            version: self.version.clone(),
            src: self.src,
            dest: relay,
            proxy: None,
            hops,
            body: EnvelopeBody::Relayed {
                inner: self.to_bincode()?,
                next_hop: self.dest,
            },
        })
    }

    /// Decode the inner envelope of a relayed one and mark the relay as its proxy.
    /// Returns `None` for direct envelopes.
    pub fn unwrap_relayed(&self) -> Result<Option<Self>> {
        let EnvelopeBody::Relayed { inner, .. } = &self.body else {
            return Ok(None);
        };
        let mut inner = Self::from_bincode(inner)?;
        inner.proxy = Some(self.dest);
        Ok(Some(inner))
    }

    /// Module and handler of a direct envelope.
    pub fn module(&self) -> Option<(&str, &str)> {
        match &self.body {
            EnvelopeBody::Direct {
                module, handler, ..
            } => Some((module.as_str(), handler.as_str())),
            EnvelopeBody::Relayed { .. } => None,
        }
    }

    /// Deserializes the data of a direct envelope into a `T` instance.
    pub fn data<T>(&self) -> Result<T>
    where T: DeserializeOwned {
        match &self.body {
            EnvelopeBody::Direct { data, .. } => {
                bincode::deserialize(data).map_err(Error::BincodeDeserialize)
            }
            EnvelopeBody::Relayed { .. } => Err(Error::UnknownModule("relayed".to_string())),
        }
    }

    /// Whether the body is [EnvelopeBody::Relayed].
    pub fn is_relayed(&self) -> bool {
        matches!(self.body, EnvelopeBody::Relayed { .. })
    }

    /// Spend one hop. Returns false when no hop was left.
    pub fn hop(&mut self) -> bool {
        match self.hops.checked_sub(1) {
            Some(h) => {
                self.hops = h;
                true
            }
            None => false,
        }
    }

    /// Clamp hops to `max_hops`.
    pub fn clamp_hops(mut self, max_hops: u8) -> Self {
        self.hops = self.hops.min(max_hops);
        self
    }

    /// Deserializes an `Envelope` instance from the given binary data.
    /// Envelopes of other versions are rejected.
    pub fn from_bincode(data: &[u8]) -> Result<Self> {
        let envelope: Self = bincode::deserialize(data).map_err(Error::BincodeDeserialize)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(Error::EnvelopeVersionMismatch(envelope.version));
        }
        Ok(envelope)
    }

    /// Serializes the `Envelope` instance into binary data.
    pub fn to_bincode(&self) -> Result<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(Error::BincodeSerialize)
    }
}
