use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Name does not spell any supported element type.
    #[snafu(display("unknown dtype '{name}'"))]
    UnknownDType { name: String },
}
