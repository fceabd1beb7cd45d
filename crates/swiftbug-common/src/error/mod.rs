pub mod backend_error;
