use super::*;

const TMDB_CHECKSUM_COLUMNS: &[&str] = &[
    "tmdb_id",
    "tmdb_overview",
    "director",
    "\"cast\"",
];

/// Stage A: looks up every movie without a TMDB id and writes its overview,
/// director and cast. Movies the service does not know keep null columns.
pub fn enrich_tmdb(
    connection: &mut Connection,
    api: &dyn TmdbApi,
    options: EnrichOptions,
) -> Result<EnrichOutcome> {
    let pending = store::load_tmdb_pending(connection)?;

    enrich_rows::<tmdb::TmdbMatch>(
        connection,
        StageName::TmdbEnrich,
        pending,
        options,
        TMDB_CHECKSUM_COLUMNS,
        |key| tmdb::find_match(api, &key.title, lookup_year(key)),
        store::apply_tmdb_match,
    )
}
