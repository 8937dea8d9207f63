//! Message routing: the dispatcher, the reply helpers and the game
//! handler table.

mod dispatcher;
mod handlers;

pub use dispatcher::{
    handler_fn, reply_error, reply_ok, reply_ok_with_data, Dispatcher, DispatcherBuilder,
    MessageHandler,
};
pub use handlers::GameHandler;
