pub mod app_user;
pub mod event;
pub mod item;
pub mod item_claim;
pub mod notification;
pub mod schedule;

pub use app_user::*;
pub use event::*;
pub use item::*;
pub use item_claim::*;
pub use notification::*;
pub use schedule::*;
