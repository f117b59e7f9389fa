pub mod observer;
pub mod voice;

pub use observer::{ObserverContext, StreamObserver, Verdict};
pub use voice::{ExternalVoice, FullResponse, VoiceStream};
