mod encoded;
mod media;

pub use encoded::{DataUrlError, EncodedImage};
pub use media::{
    extension_for_media_type, guess_media_type, is_image_media_type, MEDIA_TYPE_UNKNOWN,
};
