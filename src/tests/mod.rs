pub(crate) mod refresh_401_success;
