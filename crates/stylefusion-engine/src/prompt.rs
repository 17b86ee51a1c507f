/// Instruction sent ahead of the two inline images. Image 1 is the person,
/// image 2 the garment; part order in the request must match.
pub const TRY_ON_PROMPT: &str = "Perform a high-quality virtual try-on.
Image 1: The target person.
Image 2: The clothing item to be worn.

Task: Generate a photorealistic image of the person from Image 1 wearing the clothing from Image 2.

Requirements:
1. Identity Preservation: The person's face, hair, body shape, skin tone, and pose MUST remain exactly the same as in Image 1.
2. Clothing Fit: The clothing from Image 2 must be naturally fitted to the person's body, respecting fabric physics, folds, and draping.
3. Lighting & Integration: Match the lighting, shadows, and color tone of the clothing to the person's environment.
4. Background: Keep the original background from Image 1.
5. Output: Return ONLY the generated image.";
