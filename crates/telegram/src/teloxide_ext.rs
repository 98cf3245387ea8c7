//! Some extensions to the [`teloxide`].

use std::sync::Arc;
use teloxide::{
    dispatching::{
        dialogue::{ErasedStorage, GetChatId},
        DpHandlerDescription,
    },
    prelude::*,
};

use crate::handlers::{GlobalDialogue, State};

/// Enters the dialogue of the chat and injects its [`State`]; updates whose
/// state can't be read are dropped.
pub fn dialogue_enter<Upd, Output>() -> Handler<'static, DependencyMap, Output, DpHandlerDescription>
where
    Upd: GetChatId + Clone + Send + Sync + 'static,
    Output: Send + Sync + 'static,
{
    dptree::entry()
        .chain(dptree::filter_map(
            |storage: Arc<ErasedStorage<State>>, upd: Upd| {
                let chat_id = upd.chat_id()?;
                Some(GlobalDialogue::new(storage, chat_id))
            },
        ))
        .chain(dptree::filter_map_async(|dialogue: GlobalDialogue| async move {
            match dialogue.get().await {
                Ok(state) => Some(state.unwrap_or_default()),
                Err(error) => {
                    tracing::error!(
                        message = "dialogue state read failed",
                        chat_id = dialogue.chat_id().0,
                        ?error
                    );
                    None
                }
            }
        }))
}
