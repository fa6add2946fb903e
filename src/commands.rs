pub mod read {
    use crate::acquisition::{self, SlaveUnit};
    use crate::connection::Connection;
    use crate::mapping::ControllerVariant;
    use crate::readings::{RegisterAddress, Value};
    use crate::{connection, mapping, output};

    /// Read out the complete analog, digital, and integer register banks of a
    /// heat pump and print every reading.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,

        #[clap(flatten)]
        output: output::Args,

        /// The controller variant or model alias of the unit (mt_0, mt_1,
        /// pco5_0, uPC_0).
        #[arg(long, short = 't', default_value = "mt_0")]
        variant: String,

        /// The modbus unit id of the heat pump.
        #[arg(long, short = 'u', default_value_t = 1)]
        unit: u8,

        /// Only print readings whose key contains this pattern (e.g. `A_1` or
        /// `I_`).
        filter: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error(transparent)]
        UnknownVariant(#[from] mapping::Error),
        #[error("could not set up the async runtime")]
        CreateRuntime(#[source] std::io::Error),
        #[error("could not establish a connection to the heat pump")]
        Connect,
        #[error("the register readout failed")]
        Acquire(#[from] acquisition::Error),
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    struct ReadingRecord {
        key: RegisterAddress,
        value: Value,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let variant = ControllerVariant::resolve(&args.variant)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateRuntime)?;
        let unit = SlaveUnit { unit_id: args.unit, variant };
        let readings = runtime.block_on(async {
            let mut connection = Connection::new(args.connection.clone());
            if !connection.connect().await {
                return Err(Error::Connect);
            }
            let result = acquisition::acquire(&mut connection, unit).await;
            connection.close();
            Ok(result?)
        })?;

        tracing::info!(
            message = "readout complete",
            readings = readings.len(),
            taken_at = %readings.taken_at()
        );
        let mut output = args.output.to_output()?;
        output.headers(vec!["Key", "Value"])?;
        for (address, value) in readings.iter() {
            if let Some(pattern) = &args.filter {
                if !address.to_string().contains(pattern) {
                    continue;
                }
            }
            output.row(
                || vec![address.to_string(), value.to_string()],
                || ReadingRecord { key: address, value },
            )?;
        }
        Ok(output.finish()?)
    }
}

pub mod variants {
    use crate::mapping::{Bank, ControllerVariant};
    use crate::output;

    /// List the known controller variants and their register bank layouts.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    struct LayoutRecord {
        variant: String,
        bank: Bank,
        kind: String,
        start: u16,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output()?;
        output.headers(vec!["Variant", "Bank", "Kind", "Start"])?;
        for variant in ControllerVariant::all() {
            let layout = variant.layout();
            for bank in Bank::ALL {
                let window = layout.window(bank);
                output.row(
                    || {
                        vec![
                            variant.to_string(),
                            bank.to_string(),
                            window.kind.to_string(),
                            window.start.to_string(),
                        ]
                    },
                    || LayoutRecord {
                        variant: variant.to_string(),
                        bank,
                        kind: window.kind.to_string(),
                        start: window.start,
                    },
                )?;
            }
        }
        Ok(output.finish()?)
    }
}
