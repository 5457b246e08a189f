//! One-shot "say" command

use std::error::Error;
use std::io::{self, Write};

use crate::core::conversation::StreamUpdate;
use crate::core::runtime::ChatRuntime;

pub async fn run_say(mut runtime: ChatRuntime, prompt: &str) -> Result<(), Box<dyn Error>> {
    runtime.open(None).await?;
    runtime.submit(prompt).await?;

    let mut stdout = io::stdout();
    let mut write_error = None;
    let update = runtime
        .wait_until_ready(|text| {
            if write_error.is_none() {
                if let Err(err) = write!(stdout, "{text}").and_then(|()| stdout.flush()) {
                    write_error = Some(err);
                }
            }
        })
        .await;
    if let Some(err) = write_error {
        return Err(err.into());
    }
    println!();

    match update {
        Some(StreamUpdate::Failed { error, .. }) => Err(error.into()),
        _ => Ok(()),
    }
}
