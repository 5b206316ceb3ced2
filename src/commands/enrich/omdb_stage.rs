use super::*;

const OMDB_CHECKSUM_COLUMNS: &[&str] = &["omdb_overview", "director", "\"cast\""];

/// Stage B: fills `omdb_overview`, and director/cast where Stage A left
/// them empty.
pub fn enrich_omdb(
    connection: &mut Connection,
    api: &dyn OmdbApi,
    options: EnrichOptions,
) -> Result<EnrichOutcome> {
    let pending = store::load_omdb_pending(connection)?;

    enrich_rows::<omdb::OmdbMatch>(
        connection,
        StageName::OmdbEnrich,
        pending,
        options,
        OMDB_CHECKSUM_COLUMNS,
        |key| omdb::find_match(api, &key.title, lookup_year(key)),
        store::apply_omdb_match,
    )
}
