use clap::Parser;

use crate::{cli::device::DeviceArgs, decoder::Decoder, prelude::*};

#[derive(Parser)]
pub struct QueryArgs {
    /// Command name, for example `QPIGS` or `QPGS1`.
    pub command: String,

    #[clap(flatten)]
    pub device: DeviceArgs,
}

impl QueryArgs {
    pub async fn run(self) -> Result {
        let book = self.device.schema_book()?;
        let command = book.command_by_name(&self.command);
        let payload = self.device.client().execute(&command).await?;
        if command.schema.fields.is_empty() {
            println!("{payload}");
        } else {
            let record = Decoder::default().decode(&command, &payload)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Ok(())
    }
}
