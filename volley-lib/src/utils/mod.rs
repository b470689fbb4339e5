pub(crate) mod url;
