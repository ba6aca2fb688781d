use minijinja::{AutoEscape, Environment, context};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

const TEMPLATE_NAME: &str = "schema_prompt.jinja";
const TEMPLATE_SOURCE: &str = include_str!("../../templates/schema_prompt.jinja");

/// One worked question/query/answer triple shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Example {
    pub question: String,
    pub sql_query: String,
    pub expected_result: String,
}

impl Example {
    pub fn new(question: &str, sql_query: &str, expected_result: &str) -> Self {
        Self {
            question: question.to_string(),
            sql_query: sql_query.to_string(),
            expected_result: expected_result.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to render schema prompt: {0}")]
    Render(#[from] minijinja::Error),
}

/// Rendered instruction block: schema description followed by the examples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
    examples: Vec<Example>,
}

impl PromptTemplate {
    pub fn build(examples: &[Example]) -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_template(TEMPLATE_NAME, TEMPLATE_SOURCE)?;

        let text = env
            .get_template(TEMPLATE_NAME)?
            .render(context! { examples => examples })?;

        Ok(Self {
            text,
            examples: examples.to_vec(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The built-in few-shot examples, in prompt order.
pub fn few_shot_examples() -> Vec<Example> {
    vec![
        Example::new(
            "What is the average rental duration for all films?",
            "SELECT AVG(rental_duration) AS average_rental_duration FROM film;",
            "The average rental duration for all films is 4.98 days.",
        ),
        Example::new(
            "List all the film titles.",
            "SELECT title FROM film;",
            "Here are the titles of all films in the database.",
        ),
        Example::new(
            "How many films are there in each category?",
            "SELECT c.name AS category_name, COUNT(f.film_id) AS num_films\n\
             FROM category c\n\
             JOIN film_category fc ON c.category_id = fc.category_id\n\
             JOIN film f ON fc.film_id = f.film_id\n\
             GROUP BY c.name;",
            "Here is the count of films in each category.",
        ),
        Example::new(
            "Show the top 5 films with the longest rental duration.",
            "SELECT title, rental_duration\n\
             FROM film\n\
             ORDER BY rental_duration DESC\n\
             LIMIT 5;",
            "Here are the top 5 films with the longest rental duration.",
        ),
        Example::new(
            "What is the total revenue generated from film rentals?",
            "SELECT SUM(p.amount) AS total_revenue\n\
             FROM payment p\n\
             JOIN rental r ON p.rental_id = r.rental_id;",
            "The total revenue generated from film rentals is $XXXX.",
        ),
    ]
}
