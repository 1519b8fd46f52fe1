//! Service macro for defining typed RPC interfaces
//!
//! # Example
//!
//! ```ignore
//! treillis::service! {
//!     pub trait Calculator {
//!         async fn add(a: i64, b: i64) -> i64;
//!         async fn greet(name: String) -> String;
//!     }
//! }
//! ```
//!
//! This generates:
//! - `Calculator`, the trait an implementation fills in (methods may fail
//!   with [`RemoteError`], which travels to the caller as a failure frame)
//! - `CalculatorClient`, whose async methods invoke the peer over a
//!   [`Communicator`] and decode typed results
//! - `calculator_provider(service)`, building the [`Provider`] that exposes
//!   every method to the peer
//!
//! [`RemoteError`]: crate::RemoteError
//! [`Communicator`]: crate::Communicator
//! [`Provider`]: crate::Provider

/// Define a typed service interface over the dotted-path RPC surface.
///
/// Each method becomes one listener, called with positional parameters.
#[macro_export]
macro_rules! service {
    (
        $(#[$trait_attr:meta])*
        $vis:vis trait $name:ident {
            $(
                $(#[$method_attr:meta])*
                async fn $method:ident($($arg:ident: $arg_ty:ty),* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $crate::paste::paste! {
            // Service trait
            $(#[$trait_attr])*
            $vis trait $name {
                $(
                    $(#[$method_attr])*
                    fn $method(
                        &self,
                        $($arg: $arg_ty),*
                    ) -> impl ::std::future::Future<
                        Output = ::std::result::Result<$ret, $crate::RemoteError>,
                    > + ::std::marker::Send;
                )*
            }

            // Client struct
            #[derive(Clone)]
            $vis struct [<$name Client>] {
                communicator: $crate::Communicator,
            }

            impl [<$name Client>] {
                /// Create a client stub over a communicator whose peer
                /// exposes the service.
                pub fn new(communicator: $crate::Communicator) -> Self {
                    Self { communicator }
                }

                $(
                    $(#[$method_attr])*
                    pub async fn $method(
                        &self,
                        $($arg: $arg_ty),*
                    ) -> ::std::result::Result<$ret, $crate::RpcError> {
                        let parameters =
                            $crate::IntoParameters::into_parameters(($($arg,)*))?;
                        let value = self
                            .communicator
                            .invoke(stringify!($method), parameters)
                            .await?;
                        $crate::serde_json::from_value(value)
                            .map_err(|error| $crate::RpcError::Codec(error.to_string()))
                    }
                )*
            }

            // Provider constructor
            #[allow(unused_mut)]
            $vis fn [<$name:snake _provider>]<S>(service: S) -> $crate::Provider
            where
                S: $name + Send + Sync + 'static,
            {
                let service = ::std::sync::Arc::new(service);
                let mut builder = $crate::Provider::builder();
                $(
                    {
                        let service = ::std::sync::Arc::clone(&service);
                        builder = builder.raw(
                            stringify!($method),
                            move |parameters: ::std::vec::Vec<$crate::serde_json::Value>| {
                                let service = ::std::sync::Arc::clone(&service);
                                async move {
                                    #[allow(unused_mut, unused_variables)]
                                    let mut parameters = parameters.into_iter();
                                    $(
                                        let $arg: $arg_ty = $crate::provider::take_parameter(
                                            &mut parameters,
                                            stringify!($arg),
                                        )?;
                                    )*
                                    let value = service.$method($($arg),*).await?;
                                    $crate::serde_json::to_value(value).map_err(|error| {
                                        $crate::RemoteError::new(
                                            "EncodeError",
                                            error.to_string(),
                                        )
                                    })
                                }
                            },
                        );
                    }
                )*
                builder.build()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::channel;
    use crate::frame::RemoteError;

    crate::service! {
        /// Arithmetic over the wire.
        pub trait Calculator {
            async fn add(a: i64, b: i64) -> i64;
            async fn greet(name: String) -> String;
            async fn fail(reason: String) -> ();
        }
    }

    struct CalculatorImpl;

    impl Calculator for CalculatorImpl {
        async fn add(&self, a: i64, b: i64) -> Result<i64, RemoteError> {
            Ok(a + b)
        }

        async fn greet(&self, name: String) -> Result<String, RemoteError> {
            Ok(format!("Hello, {name}!"))
        }

        async fn fail(&self, reason: String) -> Result<(), RemoteError> {
            Err(RemoteError::new("Error", reason))
        }
    }

    #[tokio::test]
    async fn typed_calls_round_trip() {
        let (acceptor, connector) = channel::pair(vec![]);
        acceptor
            .accept(calculator_provider(CalculatorImpl))
            .await
            .unwrap();
        connector.connect(None).await.unwrap();

        let client = CalculatorClient::new(connector.communicator().clone());
        assert_eq!(client.add(2, 3).await.unwrap(), 5);
        assert_eq!(client.greet("World".to_owned()).await.unwrap(), "Hello, World!");
    }

    #[tokio::test]
    async fn typed_failures_keep_their_message() {
        let (acceptor, connector) = channel::pair(vec![]);
        acceptor
            .accept(calculator_provider(CalculatorImpl))
            .await
            .unwrap();
        connector.connect(None).await.unwrap();

        let client = CalculatorClient::new(connector.communicator().clone());
        let error = client.fail("boom".to_owned()).await.unwrap_err();
        assert_eq!(error.remote().unwrap().message, "boom");
    }
}
