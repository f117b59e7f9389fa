pub mod transcript;

pub use transcript::{ActivityClock, ChatTranscript};
