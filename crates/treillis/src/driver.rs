//! Lazy dotted-path proxies onto the peer's provider.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::communicator::Communicator;
use crate::error::RpcError;
use crate::frame::IntoParameters;

/// A path proxy onto the remote provider.
///
/// The surface is lazy: nothing about the peer is enumerated up front.
/// [`entry`] on the root names the path `m`; [`entry`] on that proxy names
/// `m.n`; invoking a proxy calls the function at its path with positional
/// arguments, however deep the path goes.
///
/// [`entry`]: Driver::entry
#[derive(Clone)]
pub struct Driver {
    communicator: Communicator,
    path: String,
}

impl Driver {
    pub(crate) fn root(communicator: Communicator) -> Self {
        Driver {
            communicator,
            path: String::new(),
        }
    }

    /// A proxy one member deeper.
    pub fn entry(&self, name: &str) -> Driver {
        let path = if self.path.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{}", self.path, name)
        };
        Driver {
            communicator: self.communicator.clone(),
            path,
        }
    }

    /// The dotted path this proxy names.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Invoke the function at this path, decoding the typed result.
    pub async fn invoke<R>(&self, parameters: impl IntoParameters) -> Result<R, RpcError>
    where
        R: DeserializeOwned,
    {
        let value = self.invoke_value(parameters).await?;
        serde_json::from_value(value).map_err(|error| RpcError::Codec(error.to_string()))
    }

    /// Invoke the function at this path, returning the raw result value.
    pub async fn invoke_value(
        &self,
        parameters: impl IntoParameters,
    ) -> Result<Value, RpcError> {
        self.communicator
            .invoke(&self.path, parameters.into_parameters()?)
            .await
    }
}
