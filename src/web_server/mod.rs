pub(crate) mod middleware;
pub(crate) mod pages;
pub(crate) mod prelude;
pub(crate) mod session;
