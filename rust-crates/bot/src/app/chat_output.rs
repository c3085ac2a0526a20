use crate::{
    Result,
    render::Reply,
};

pub trait ChatOutput {
    /// Post a message and return its id.
    fn send(
        &mut self,
        chat_id: i64,
        reply_to: Option<i64>,
        reply: &Reply,
    ) -> impl Future<Output = Result<i64>>;

    fn edit(
        &mut self,
        chat_id: i64,
        message_id: i64,
        reply: &Reply,
    ) -> impl Future<Output = Result<()>>;
}
