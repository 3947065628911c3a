/// Declares a typed client interface for a service and implements it for the service's
/// [`ServiceHandle`](crate::ServiceHandle).
///
/// ```ignore
/// microrpc::interface! {
///     pub trait EchoApi for Echo {
///         fn reply(text: String) -> String;
///         fn forget() -> ();
///     }
/// }
///
/// let echo = locator.get::<Echo>()?;
/// let answer = echo.reply("hi".into()).await?;
/// ```
///
/// Each method forwards to [`ServiceHandle::call`](crate::ServiceHandle::call) under its own
/// name, so the names must match the ones in the service's dispatch table.
#[macro_export]
macro_rules! interface {
    (
        $(#[$attr:meta])*
        $vis:vis trait $name:ident for $service:ty {
            $(
                $(#[$method_attr:meta])*
                fn $method:ident ( $($arg:ident : $arg_ty:ty),* $(,)? ) -> $ret:ty ;
            )*
        }
    ) => {
        $(#[$attr])*
        $vis trait $name {
            $(
                $(#[$method_attr])*
                fn $method(&self, $($arg: $arg_ty),*) -> $crate::BoxFuture<'_, $crate::Result<$ret>>;
            )*
        }

        impl $name for $crate::ServiceHandle<$service> {
            $(
                fn $method(&self, $($arg: $arg_ty),*) -> $crate::BoxFuture<'_, $crate::Result<$ret>> {
                    ::std::boxed::Box::pin(
                        self.call::<_, $ret>(::std::stringify!($method), ($($arg,)*))
                    )
                }
            )*
        }
    };
}
