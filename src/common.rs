pub mod init;
pub mod tensor_ext;
