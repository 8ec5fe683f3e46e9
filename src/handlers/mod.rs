mod echo;
mod health;
mod root;

pub use echo::{MAX_MESSAGE_LEN, echo};
pub use health::health_check;
pub use root::{NOT_FOUND_DETAIL, api_root, not_found};
