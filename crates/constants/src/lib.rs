use std::time::Duration;

/// Name of the directory (under the platform data dir) holding config, logs and resume state
pub const APP_DIR_NAME: &str = "Vidream";

/// Size of every PATCH body sent to the video host, regardless of platform
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Delays between attempts of a single upload request. The first retry is immediate;
/// once the schedule is exhausted the error is surfaced.
pub const RETRY_DELAYS: [Duration; 5] = [
    Duration::from_secs(0),
    Duration::from_secs(3),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
];

/// How long an issued upload signature stays valid
pub const SIGNATURE_TTL: Duration = Duration::from_secs(60 * 60);

/// Percent reported while the total size of an upload is unknown
pub const NOMINAL_PROGRESS_PERCENT: f64 = 1.0;

/// Minimum interval between two throttled progress reports
pub const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_millis(100);

pub mod limits {
    pub const TITLE_MAX_CHARS: usize = 100;
    pub const DESCRIPTION_MAX_CHARS: usize = 5000;
}

/// Extensions accepted when the platform does not report a MIME type
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];

pub mod bunny {
    pub const API_BASE: &str = "https://video.bunnycdn.com";
    pub const TUS_ENDPOINT: &str = "https://video.bunnycdn.com/tusupload";

    pub mod env {
        pub const LIBRARY_ID: &str = "BUNNY_LIBRARY_ID";
        pub const API_KEY: &str = "BUNNY_API_KEY";
        pub const API_BASE: &str = "BUNNY_API_BASE";
    }
}

pub mod tus {
    pub const VERSION: &str = "1.0.0";
    pub const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

    pub mod headers {
        pub const TUS_RESUMABLE: &str = "Tus-Resumable";
        pub const UPLOAD_LENGTH: &str = "Upload-Length";
        pub const UPLOAD_OFFSET: &str = "Upload-Offset";
        pub const UPLOAD_METADATA: &str = "Upload-Metadata";
        pub const AUTHORIZATION_SIGNATURE: &str = "AuthorizationSignature";
        pub const AUTHORIZATION_EXPIRE: &str = "AuthorizationExpire";
        pub const VIDEO_ID: &str = "VideoId";
        pub const LIBRARY_ID: &str = "LibraryId";
    }
}

/// Function paths on the hosted backend
pub mod convex {
    pub const CREATE_VIDEO: &str = "videos:createVideo";
    pub const UPDATE_VIDEO: &str = "videos:updateVideo";
    pub const LIST_USER_VIDEOS: &str = "videos:getUserVideos";
    pub const GET_VIDEO: &str = "videos:getVideoById";
    pub const UPLOAD_CREDENTIALS: &str = "bunny:getUploadCredentials";
}

pub mod filename {
    pub mod persistent {
        /// The config file, stored in persistent data directory
        pub const CONFIG: &str = "config.json";
        /// Video records of the local backend
        pub const VIDEOS: &str = "videos.json";
        /// Upload sessions that can still be resumed
        pub const PENDING_UPLOADS: &str = "pending-uploads.json";
        pub const LOG: &str = "vidream-debug.log";
    }
}
