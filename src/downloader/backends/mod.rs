// Media backends

mod ytdlp;

pub use ytdlp::{audio_format_spec, mux_args, video_format_spec, YtDlpBackend};
