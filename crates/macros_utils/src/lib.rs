//! Small declarative helpers shared by the HTTP surface.

#[cfg(feature = "actix")]
#[doc(hidden)]
pub use actix_web;

/// Generates a `routes` function registering the listed actix handlers.
///
/// ```ignore
/// macros_utils::routes! {
///     route health_route,
///     route heartbeat_route,
/// }
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($(route $handler:ident),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::actix_web::web::ServiceConfig) {
            $( cfg.service($handler); )*
        }
    };
}
