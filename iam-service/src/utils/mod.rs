pub mod crypto;
pub mod deadline;
pub mod password;
pub mod recovery;
pub mod validation;

pub use deadline::Deadline;
pub use password::{hash_password, needs_rehash, verify_password, HashParams, Password, PasswordHashString};
pub use validation::{normalize_email, normalize_username, ValidatedJson};
