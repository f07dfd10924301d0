pub(crate) use slink_utils::error::{here, ErrorPeer, OpaqueResult, ResultLocation};
