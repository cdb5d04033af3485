mod invalid_tokens;
mod questions;
mod quizzes;
mod refresh_tokens;
mod results;
mod users;

pub use invalid_tokens::PgInvalidTokenRepo;
pub use questions::PgQuestionRepo;
pub use quizzes::PgQuizRepo;
pub use refresh_tokens::PgRefreshTokenRepo;
pub use results::PgResultRepo;
pub use users::PgUserRepo;
