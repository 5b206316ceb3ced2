use super::*;

struct GenreCache<'a> {
    connection: &'a Connection,
    ids: HashMap<String, i64>,
}

impl<'a> GenreCache<'a> {
    fn new(connection: &'a Connection) -> Self {
        Self {
            connection,
            ids: HashMap::new(),
        }
    }

    fn id_for(&mut self, name: &str) -> Result<i64> {
        if let Some(id) = self.ids.get(name) {
            return Ok(*id);
        }

        self.connection
            .execute("INSERT OR IGNORE INTO genres(name) VALUES (?1)", params![name])?;
        let id: i64 = self.connection.query_row(
            "SELECT id FROM genres WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }

    fn link(&mut self, movie_id: i64, genres: &[String]) -> Result<()> {
        for genre in genres {
            let genre_id = self.id_for(genre)?;
            self.connection.execute(
                "INSERT OR IGNORE INTO movie_genre(movie_id, genre_id) VALUES (?1, ?2)",
                params![movie_id, genre_id],
            )?;
        }
        Ok(())
    }
}

fn dedupe_key(title: &str, year: Option<i64>) -> (String, Option<i64>) {
    (title.trim().to_lowercase(), year)
}

fn average_ratings(ratings: &[SourceRating]) -> HashMap<i64, f64> {
    let mut sums = HashMap::<i64, (f64, usize)>::new();
    for rating in ratings {
        let entry = sums.entry(rating.movie_id).or_insert((0.0, 0));
        entry.0 += rating.rating;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(movie_id, (sum, count))| (movie_id, sum / count as f64))
        .collect()
}

/// MovieLens rows keep their source ids. TMDB 5000 rows not already present
/// by (title, year) get ids after the largest MovieLens id, in file order;
/// duplicates only contribute their genres.
pub(super) fn insert_dataset(
    tx: &Transaction<'_>,
    movies: &[SourceMovie],
    ratings: &[SourceRating],
    tmdb_movies: &[Tmdb5000Movie],
) -> Result<IngestOutcome> {
    let averages = average_ratings(ratings);
    let mut genres = GenreCache::new(tx);
    let mut by_key = HashMap::<(String, Option<i64>), i64>::new();
    let mut outcome = IngestOutcome::default();

    {
        let mut insert_movie = tx.prepare(
            "INSERT INTO movies(id, title, year, avg_rating, imdb_url) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;

        for movie in movies {
            insert_movie
                .execute(params![
                    movie.movie_id,
                    movie.title,
                    movie.year,
                    averages.get(&movie.movie_id),
                    movie.imdb_url,
                ])
                .with_context(|| format!("failed to insert movie {}", movie.movie_id))?;
            genres.link(movie.movie_id, &movie.genres)?;
            by_key.insert(dedupe_key(&movie.title, movie.year), movie.movie_id);
            outcome.movielens_movies += 1;
        }

        let mut next_id = movies.iter().map(|movie| movie.movie_id).max().unwrap_or(0) + 1;
        for movie in tmdb_movies {
            let key = dedupe_key(&movie.title, movie.year);
            if let Some(existing_id) = by_key.get(&key) {
                genres.link(*existing_id, &movie.genres)?;
                continue;
            }

            insert_movie.execute(params![
                next_id,
                movie.title,
                movie.year,
                Option::<f64>::None,
                movie.imdb_url,
            ])?;
            genres.link(next_id, &movie.genres)?;
            by_key.insert(key, next_id);
            outcome.tmdb_movies_added += 1;
            next_id += 1;
        }
    }

    {
        let mut insert_rating =
            tx.prepare("INSERT INTO ratings(movie_id, user_id, rating) VALUES (?1, ?2, ?3)")?;
        let known_ids = movies
            .iter()
            .map(|movie| movie.movie_id)
            .collect::<std::collections::HashSet<i64>>();

        for rating in ratings {
            if !known_ids.contains(&rating.movie_id) {
                outcome.ratings_skipped += 1;
                continue;
            }
            insert_rating.execute(params![rating.movie_id, rating.user_id, rating.rating])?;
            outcome.ratings_inserted += 1;
        }
    }

    outcome.genres = genres.ids.len();
    Ok(outcome)
}
