use crate::{
    Result,
    intents::Intent,
};

pub trait IntentSource {
    /// Next inbound update, `None` once the source is exhausted.
    fn next_intent(&mut self) -> impl Future<Output = Result<Option<Intent>>>;
}
