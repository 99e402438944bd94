pub mod session_list;
pub mod spectrum_panel;
pub mod status_bar;
