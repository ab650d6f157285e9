use time::macros::format_description;
use time::OffsetDateTime;

use crate::extractor::ValueMap;
use crate::source_ref::SourceReference;

/// Field holding the display form of the file a record came from.
pub const INPUT_FILENAME_FIELD: &str = "input_filename";

/// Field holding the import timestamp.
pub const IMPORTED_FIELD: &str = "imported";

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}

#[derive(Clone, Default)]
pub struct SystemClock {}

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// UTC timestamp formatted as `yyyyMMddHHmmss`.
pub fn import_timestamp(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "[year][month][day][hour][minute][second]"
        ))
        .expect("import timestamp format only uses components every date has")
}

/// Adds the source metadata to a value map and encodes it as a JSON object of strings.
///
/// Field order is the insertion order of the map, so identical input always encodes to
/// the same string. Metadata fields overwrite same-named columns in place.
pub fn build(
    mut values: ValueMap,
    source: &SourceReference,
    imported_at: &str,
) -> Result<String, serde_json::Error> {
    values.insert(INPUT_FILENAME_FIELD.to_string(), source.to_string());
    values.insert(IMPORTED_FIELD.to_string(), imported_at.to_string());
    serde_json::to_string(&values)
}
