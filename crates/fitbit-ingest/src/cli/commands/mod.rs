pub mod ingest;
pub mod reset;
pub mod status;

pub use ingest::run as ingest;
pub use reset::run as reset;
pub use status::run as status;

use crate::error::Result;
use crate::models::MetricKind;

/// Interpret the metric/user filter flags; the literal `all` means no filter
fn parse_filters<'a>(
    metric: Option<&str>,
    user: Option<&'a str>,
) -> Result<(Option<MetricKind>, Option<&'a str>)> {
    let metric = match metric {
        Some(m) if m.eq_ignore_ascii_case("all") => None,
        Some(m) => Some(m.parse()?),
        None => None,
    };
    let user = match user {
        Some(u) if u.eq_ignore_ascii_case("all") => None,
        other => other,
    };
    Ok((metric, user))
}
