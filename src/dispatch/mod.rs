//! Hook pipeline and dispatcher.

mod descriptor;
mod dispatcher;
mod hooks;

pub use descriptor::EntityDescriptor;
pub use dispatcher::{
    Dispatcher, Reply, RequestContext, FILTER_PARAM, LIST_PARAM, NEW_ID, PLATFORM_USER_TYPE, SITE_OVERRIDE_PARAM,
};
pub use hooks::{EntityHooks, Flow, NoHooks};
