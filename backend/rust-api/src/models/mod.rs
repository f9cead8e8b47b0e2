pub mod attempt;
pub mod progress;
pub mod quota;
pub mod room_event;

pub use attempt::{
    Answer, AnswerValue, AttemptSession, AttemptStatus, FinishAttemptRequest,
    StartAttemptResponse, SubmitAnswerRequest, XpReward,
};
pub use progress::{LeaderboardEntry, RankProgress, RankTier, UserProgress};
pub use quota::{QuotaRecord, QuotaRule, QuotaSnapshot, QuotaStatus, WindowPolicy};
