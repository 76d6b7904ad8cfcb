/// Declares a remote interface.
///
/// Every method takes `&self`, lists the error kinds it may raise in `#[throws(...)]` and
/// names its plain return type. The list must include [`TransportError`](crate::TransportError),
/// otherwise stubs and skeletons reject the interface.
///
/// ```ignore
/// rmiquickly::remote_interface! {
///     pub trait Calculator {
///         #[throws(TransportError, DivideByZero)]
///         fn divide(&self, a: i64, b: i64) -> i64;
///     }
/// }
/// ```
///
/// This expands to an `async_trait` trait whose methods return `Result<R, RemoteError>`, its
/// [`RemoteInterface`](crate::RemoteInterface) impl for `dyn Calculator`, and an impl of the
/// trait for [`Stub<dyn Calculator>`](crate::Stub). Implementations are written with
/// `#[rmiquickly::async_trait]`.
#[macro_export]
macro_rules! remote_interface {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $(
                $(#[doc = $doc:literal])*
                #[throws($($err:ty),* $(,)?)]
                fn $method:ident(&self $(, $arg:ident : $arg_ty:ty)* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[$crate::async_trait]
        $vis trait $name: ::std::marker::Send + ::std::marker::Sync + 'static {
            $(
                $(#[doc = $doc])*
                async fn $method(&self $(, $arg: $arg_ty)*)
                    -> ::std::result::Result<$ret, $crate::RemoteError>;
            )*
        }

        impl $crate::RemoteInterface for dyn $name {
            const NAME: &'static str = ::std::concat!(::std::module_path!(), "::", ::std::stringify!($name));

            fn descriptor() -> $crate::InterfaceDescriptor {
                $crate::InterfaceDescriptor::new(<Self as $crate::RemoteInterface>::NAME)
                $(
                    .method(
                        $crate::MethodDescriptor::new(::std::stringify!($method))
                            $(.param(<$arg_ty as $crate::Typed>::rpc_type()))*
                            .returns(<$ret as $crate::Typed>::rpc_type())
                            $(.throws(<$err as $crate::ErrorKind>::KIND))*
                    )
                )*
            }

            fn dispatcher() -> $crate::Dispatcher<Self> {
                #[allow(unused_mut)]
                let mut dispatcher = $crate::Dispatcher::new();
                $(
                    dispatcher.add(
                        ::std::stringify!($method),
                        ::std::vec![$(<$arg_ty as $crate::Typed>::rpc_type()),*],
                        |target: ::std::sync::Arc<dyn $name>, args: ::std::vec::Vec<$crate::Value>| async move {
                            #[allow(unused_mut)]
                            let mut args = $crate::dispatcher::Arguments::new(
                                args,
                                <[&str]>::len(&[$(::std::stringify!($arg)),*]),
                            )?;
                            $(let $arg = args.next::<$arg_ty>()?;)*
                            let retval = target
                                .$method($($arg),*)
                                .await
                                .map_err($crate::dispatcher::DispatchError::Raised)?;
                            $crate::dispatcher::encode_return(retval)
                        },
                    );
                )*
                dispatcher
            }
        }

        #[$crate::async_trait]
        impl $name for $crate::Stub<dyn $name> {
            $(
                async fn $method(&self $(, $arg: $arg_ty)*)
                    -> ::std::result::Result<$ret, $crate::RemoteError>
                {
                    let args = ::std::vec![
                        $($crate::Encode::encode($arg).map_err($crate::TransportError::from)?),*
                    ];
                    let retval = $crate::Stub::handle(self)
                        .invoke(
                            ::std::stringify!($method),
                            ::std::vec![$(<$arg_ty as $crate::Typed>::rpc_type()),*],
                            args,
                        )
                        .await?;
                    ::std::result::Result::Ok(
                        <$ret as $crate::Decode>::decode(retval).map_err($crate::TransportError::from)?,
                    )
                }
            )*
        }
    };
}

/// Registers a serde type as a transmittable value with a name and encoding version.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Point { x: i32, y: i32 }
///
/// rmiquickly::transmittable!(Point, "geometry.Point", 1);
/// ```
#[macro_export]
macro_rules! transmittable {
    ($ty:ty, $name:expr, $version:expr) => {
        impl $crate::Transmittable for $ty {
            const NAME: &'static str = $name;
            const VERSION: u32 = $version;
        }

        impl $crate::Typed for $ty {
            fn rpc_type() -> $crate::Type {
                $crate::types::custom_type::<Self>()
            }
        }

        impl $crate::Encode for $ty {
            fn encode(self) -> ::std::result::Result<$crate::Value, $crate::CodecError> {
                $crate::types::encode_custom(&self)
            }
        }

        impl $crate::Decode for $ty {
            fn decode(val: $crate::Value) -> ::std::result::Result<Self, $crate::CodecError> {
                $crate::types::decode_custom(val)
            }
        }
    };
}

/// Implements [`Throwable`](crate::Throwable) for an error type under a wire kind.
#[macro_export]
macro_rules! throwable {
    ($ty:ty, $kind:expr) => {
        impl $crate::Throwable for $ty {
            const KIND: &'static str = $kind;
        }
    };
}
