use std::fs;
use std::path::{Path, PathBuf};

const GENRES: [&str; 19] = [
    "unknown",
    "Action",
    "Adventure",
    "Animation",
    "Children's",
    "Comedy",
    "Crime",
    "Documentary",
    "Drama",
    "Fantasy",
    "Film-Noir",
    "Horror",
    "Musical",
    "Mystery",
    "Romance",
    "Sci-Fi",
    "Thriller",
    "War",
    "Western",
];

/// (id, raw title, genre names) of the fixture catalogue.
pub(crate) const FIXTURE_MOVIES: [(i64, &str, &[&str]); 4] = [
    (1, "Toy Story (1995)", &["Animation", "Children's", "Comedy"]),
    (2, "GoldenEye (1995)", &["Action", "Adventure", "Thriller"]),
    (3, "Usual Suspects, The (1995)", &["Crime", "Thriller"]),
    (4, "Heat (1995)", &["Action", "Crime", "Thriller"]),
];

fn item_line(id: i64, raw_title: &str, genres: &[&str]) -> String {
    let flags = GENRES
        .iter()
        .map(|genre| if genres.contains(genre) { "1" } else { "0" })
        .collect::<Vec<&str>>()
        .join("|");
    format!("{id}|{raw_title}|01-Jan-1995||http://us.imdb.com/M/title-exact?{id}|{flags}")
}

/// Writes a tiny MovieLens-shaped dataset into `dir` and returns it.
pub(crate) fn write_movielens_fixture(dir: &Path) -> PathBuf {
    let dataset_dir = dir.join("ml-100k");
    fs::create_dir_all(&dataset_dir).expect("fixture dir should be created");

    let genre_lines = GENRES
        .iter()
        .enumerate()
        .map(|(index, name)| format!("{name}|{index}"))
        .collect::<Vec<String>>()
        .join("\n");
    fs::write(dataset_dir.join("u.genre"), format!("{genre_lines}\n\n"))
        .expect("u.genre should be written");

    let item_lines = FIXTURE_MOVIES
        .iter()
        .map(|(id, title, genres)| item_line(*id, title, genres))
        .collect::<Vec<String>>()
        .join("\n");
    fs::write(dataset_dir.join("u.item"), format!("{item_lines}\n"))
        .expect("u.item should be written");

    let ratings = [
        "196\t1\t5\t881250949",
        "186\t1\t3\t891717742",
        "22\t2\t4\t878887116",
        "244\t4\t2\t880606923",
        "166\t99\t1\t886397596",
    ];
    fs::write(dataset_dir.join("u.data"), format!("{}\n", ratings.join("\n")))
        .expect("u.data should be written");

    dataset_dir
}

/// TMDB 5000 csv with one duplicate of a MovieLens title and one new movie.
pub(crate) fn write_tmdb5000_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("tmdb_5000_movies.csv");
    let body = "\
budget,genres,id,imdb_id,original_title,release_date,title
60000000,\"[{\"\"id\"\": 80, \"\"name\"\": \"\"Crime\"\"}, {\"\"id\"\": 18, \"\"name\"\": \"\"Drama\"\"}]\",949,tt0113277,Heat,1995-12-15,Heat
237000000,\"[{\"\"id\"\": 878, \"\"name\"\": \"\"Science Fiction\"\"}]\",19995,tt0499549,Avatar,2009-12-10,Avatar
0,[],1,,,,
";
    fs::write(&path, body).expect("tmdb csv should be written");
    path
}
