//! Sample books for an empty collection (`--seed`).

use mongodb::bson::{Document, doc};

use crate::config::ReportFields;

const BOOKS: &[(&str, &str, &str, i32, f64, bool)] = &[
    ("The Great Gatsby", "F. Scott Fitzgerald", "Fiction", 1925, 10.99, true),
    ("Moby Dick", "Herman Melville", "Fiction", 1851, 9.50, false),
    ("To Kill a Mockingbird", "Harper Lee", "Fiction", 1960, 12.49, true),
    ("1984", "George Orwell", "Dystopian", 1949, 8.99, true),
    ("Animal Farm", "George Orwell", "Dystopian", 1945, 7.49, true),
    ("Homage to Catalonia", "George Orwell", "Non-Fiction", 1938, 11.00, false),
    ("Dune", "Frank Herbert", "Sci-Fi", 1965, 14.99, true),
    ("Neuromancer", "William Gibson", "Sci-Fi", 1984, 13.50, false),
    ("The Road", "Cormac McCarthy", "Fiction", 2006, 15.00, true),
    ("Life of Pi", "Yann Martel", "Fiction", 2001, 11.99, false),
    ("The Martian", "Andy Weir", "Sci-Fi", 2011, 16.99, true),
    ("Project Hail Mary", "Andy Weir", "Sci-Fi", 2021, 24.99, true),
    ("The Da Vinci Code", "Dan Brown", "Mystery", 2003, 9.99, true),
    ("Gone Girl", "Gillian Flynn", "Mystery", 2012, 13.99, true),
];

/// Sample documents keyed by the configured field names.
pub fn sample_books(fields: &ReportFields) -> Vec<Document> {
    BOOKS
        .iter()
        .map(|&(title, author, genre, year, price, in_stock)| {
            doc! {
                fields.title.as_str(): title,
                fields.author.as_str(): author,
                fields.genre.as_str(): genre,
                fields.published_year.as_str(): year,
                fields.price.as_str(): price,
                fields.in_stock.as_str(): in_stock,
            }
        })
        .collect()
}
