use super::*;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Tmdb5000Movie {
    pub(super) title: String,
    pub(super) year: Option<i64>,
    pub(super) genres: Vec<String>,
    pub(super) imdb_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenreCell {
    #[serde(default)]
    name: Option<String>,
}

/// The `genres` column holds a JSON list like `[{"id": 28, "name": "Action"}]`.
pub(super) fn parse_tmdb_genres(cell: &str) -> Vec<String> {
    if cell.trim().is_empty() {
        return Vec::new();
    }

    serde_json::from_str::<Vec<GenreCell>>(cell)
        .map(|cells| {
            cells
                .into_iter()
                .filter_map(|cell| cell.name)
                .filter(|name| !name.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub(super) fn year_from_date(date: &str) -> Option<i64> {
    let prefix = date.trim().get(..4)?;
    if prefix.chars().all(|c| c.is_ascii_digit()) {
        prefix.parse().ok()
    } else {
        None
    }
}

/// Reads `tmdb_5000_movies.csv` (or a `movies_metadata.csv` with the same
/// columns). Only the title column is required.
pub(super) fn read_tmdb5000_movies(path: &Path) -> Result<Vec<Tmdb5000Movie>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let column = |name: &str| headers.iter().position(|header| header == name);

    let Some(title_column) = column("title").or_else(|| column("original_title")) else {
        bail!("{} has no title/original_title column", path.display());
    };
    let genres_column = column("genres");
    let imdb_column = column("imdb_id");
    let date_column = column("release_date");
    let year_column = column("year");

    let mut movies = Vec::new();
    for (row_index, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("malformed record {} in {}", row_index + 2, path.display()))?;

        let title = record.get(title_column).unwrap_or_default().trim().to_string();
        if title.is_empty() {
            continue;
        }

        let year = date_column
            .and_then(|index| record.get(index))
            .and_then(year_from_date)
            .or_else(|| {
                year_column
                    .and_then(|index| record.get(index))
                    .and_then(|value| value.trim().parse().ok())
            });

        let genres = genres_column
            .and_then(|index| record.get(index))
            .map(parse_tmdb_genres)
            .unwrap_or_default();

        let imdb_url = imdb_column
            .and_then(|index| record.get(index))
            .map(str::trim)
            .filter(|value| value.starts_with("tt"))
            .map(|value| format!("https://www.imdb.com/title/{value}/"));

        movies.push(Tmdb5000Movie {
            title,
            year,
            genres,
            imdb_url,
        });
    }

    Ok(movies)
}
