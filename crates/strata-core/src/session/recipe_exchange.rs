use tracing::info;

use crate::error::Result;
use crate::recipe::RecipePart;
use crate::session::{expect_client_ready, SessionResources};
use strata_protocol::{
    decode_file_name, read_message, write_message, Channel, MessageHeader, MessageKind, RecipeHead,
};

/// Decoded download-recipe login: which client wants which file's recipes.
#[derive(Debug, Clone)]
pub struct RecipeLogin {
    pub client_id: u32,
    pub file_name: String,
}

impl RecipeLogin {
    pub fn decode(header: &MessageHeader, payload: &[u8]) -> Result<Self> {
        let file_name = decode_file_name(payload)?;
        Ok(RecipeLogin {
            client_id: header.client_id,
            file_name,
        })
    }
}

/// Stream a file's three recipes to the client, stop-and-wait.
///
/// All three recipe files must exist before anything is opened; a missing
/// one gets a file-not-found reply and ends the session without touching
/// any reader state. Otherwise the login response carries the plain
/// recipe's head, and each part streams batch by batch, each batch
/// acknowledged by a client-ready before the next goes out.
pub fn run(
    channel: &mut dyn Channel,
    login: RecipeLogin,
    resources: &SessionResources,
) -> Result<()> {
    if !resources.recipes.exists_all(&login.file_name)? {
        let reply = MessageHeader::new(MessageKind::FileNotFound, login.client_id);
        write_message(channel, reply, &RecipeHead::default().encode())?;
        info!(
            client_id = login.client_id,
            file = %login.file_name,
            "recipe download rejected, file unknown"
        );
        return Ok(());
    }

    let (mut readers, head) = resources.recipes.open_readers(&login.file_name)?;
    let reply = MessageHeader::new(MessageKind::LoginResponse, login.client_id);
    write_message(channel, reply, &head.encode())?;
    info!(client_id = login.client_id, file = %login.file_name, "recipe download started");

    let mut buf = Vec::new();
    expect_client_ready(channel, &mut buf)?;

    let mut entries = Vec::new();
    for part in RecipePart::ALL {
        loop {
            let count = readers.read_entries(
                part,
                &mut entries,
                resources.config.send_recipe_batch_size,
            )?;
            if count == 0 {
                break;
            }
            let header =
                MessageHeader::with_items(stream_kind(part), login.client_id, count as u32);
            write_message(channel, header, &entries)?;
            expect_client_ready(channel, &mut buf)?;
        }
    }

    let end = MessageHeader::new(MessageKind::RecipeStreamEnd, login.client_id);
    write_message(channel, end, &[])?;

    // The end marker is not acknowledged; the client just closes once it
    // has everything. A parting frame, if any, is not part of the exchange.
    let _ = read_message(channel, &mut buf);
    info!(client_id = login.client_id, file = %login.file_name, "recipe download finished");
    Ok(())
}

fn stream_kind(part: RecipePart) -> MessageKind {
    match part {
        RecipePart::Plain => MessageKind::PlainRecipeStream,
        RecipePart::Secure => MessageKind::SecureRecipeStream,
        RecipePart::Key => MessageKind::KeyRecipeStream,
    }
}
