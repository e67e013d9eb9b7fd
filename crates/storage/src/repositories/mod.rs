pub mod daily_repo;
pub mod positions_repo;
pub mod signals_repo;

pub use daily_repo::DailySummaryRepository;
pub use positions_repo::PositionsRepository;
pub use signals_repo::SignalsRepository;
