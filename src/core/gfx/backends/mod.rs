pub mod opengl;
pub mod software;
