pub mod dly;
pub mod epiccont;
pub mod epicfile;
pub mod opc;
pub mod print_control;
pub mod sit;

pub use dly::Dly;
pub use epiccont::EpicCont;
pub use epicfile::EpicFile;
pub use opc::Opc;
pub use print_control::PrintControl;
pub use sit::Sit;
