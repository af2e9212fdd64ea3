//! Door-side scanning: camera capabilities, the scan-confirm state machine
//! and the controller that drives both.

pub mod camera;
pub mod controller;
pub mod machine;
pub mod wedge;

pub use camera::{BarcodeDetector, CameraError, CameraProvider, Frame, MediaStream, StreamGuard};
pub use controller::{CameraState, ScanController, ScannerHandle, ScannerSettings, ScannerView};
pub use machine::{ScanMachine, ScanPhase, Submission};
