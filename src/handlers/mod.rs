pub mod delete_handler;
pub mod static_handler;
pub mod upload_handler;

pub use delete_handler::handle_delete;
pub use static_handler::{handle_directory, handle_static};
pub use upload_handler::handle_upload;

fn default_page(status: u16) -> String {
    crate::http::response::default_error_body(status)
}
