use super::*;

const GENRE_FLAG_COUNT: usize = 19;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct SourceMovie {
    pub(super) movie_id: i64,
    pub(super) title: String,
    pub(super) year: Option<i64>,
    pub(super) genres: Vec<String>,
    pub(super) imdb_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct SourceRating {
    pub(super) user_id: i64,
    pub(super) movie_id: i64,
    pub(super) rating: f64,
}

// MovieLens 100k ships as latin-1.
fn read_latin1(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(bytes.iter().map(|byte| char::from(*byte)).collect())
}

/// `"Toy Story (1995)"` → (`"Toy Story"`, `Some(1995)`).
pub(super) fn split_title_year(raw_title: &str) -> (String, Option<i64>) {
    let trimmed = raw_title.trim();
    if let Some(without_close) = trimmed.strip_suffix(')') {
        if let Some(open) = without_close.rfind('(') {
            let candidate = &without_close[open + 1..];
            if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(year) = candidate.parse::<i64>() {
                    return (without_close[..open].trim().to_string(), Some(year));
                }
            }
        }
    }
    (trimmed.to_string(), None)
}

/// `u.genre` lines are `name|index`.
pub(super) fn read_genre_index(path: &Path) -> Result<HashMap<usize, String>> {
    let raw = read_latin1(path)?;
    let mut out = HashMap::new();

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((name, index)) = line.split_once('|') else {
            continue;
        };
        if let Ok(index) = index.trim().parse::<usize>() {
            out.insert(index, name.trim().to_string());
        }
    }

    if out.is_empty() {
        bail!("no genres found in {}", path.display());
    }
    Ok(out)
}

/// `u.item`: `id|title|release|video release|imdb url|` + 19 genre flags.
pub(super) fn read_movielens_items(
    path: &Path,
    genre_names: &HashMap<usize, String>,
) -> Result<Vec<SourceMovie>> {
    let raw = read_latin1(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(raw.as_bytes());

    let mut movies = Vec::new();
    for (line_index, record) in reader.records().enumerate() {
        let line = line_index + 1;
        let record =
            record.with_context(|| format!("malformed record at {}:{}", path.display(), line))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() < 2 + GENRE_FLAG_COUNT {
            bail!(
                "expected at least {} fields at {}:{}, found {}",
                2 + GENRE_FLAG_COUNT,
                path.display(),
                line,
                record.len()
            );
        }

        let movie_id = record[0]
            .trim()
            .parse::<i64>()
            .with_context(|| format!("invalid movie id at {}:{}", path.display(), line))?;
        let (title, year) = split_title_year(&record[1]);
        if title.is_empty() {
            bail!("empty title at {}:{}", path.display(), line);
        }

        let imdb_url = record
            .get(4)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned);

        let flags_start = record.len() - GENRE_FLAG_COUNT;
        let genres = record
            .iter()
            .skip(flags_start)
            .enumerate()
            .filter(|(_, flag)| flag.trim() == "1")
            .filter_map(|(index, _)| genre_names.get(&index).cloned())
            .collect::<Vec<String>>();

        movies.push(SourceMovie {
            movie_id,
            title,
            year,
            genres,
            imdb_url,
        });
    }

    Ok(movies)
}

/// `u.data`: tab separated `user movie rating timestamp`.
pub(super) fn read_movielens_ratings(path: &Path) -> Result<Vec<SourceRating>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut ratings = Vec::new();
    for (line_index, record) in reader.records().enumerate() {
        let line = line_index + 1;
        let record =
            record.with_context(|| format!("malformed record at {}:{}", path.display(), line))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() < 3 {
            bail!("expected user, movie and rating at {}:{}", path.display(), line);
        }

        let parse_err = || format!("invalid rating row at {}:{}", path.display(), line);
        ratings.push(SourceRating {
            user_id: record[0].trim().parse::<i64>().with_context(parse_err)?,
            movie_id: record[1].trim().parse::<i64>().with_context(parse_err)?,
            rating: record[2].trim().parse::<f64>().with_context(parse_err)?,
        });
    }

    Ok(ratings)
}
